use std::error::Error;

use bytes::{Buf, Bytes};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use sedge_protocol::descriptors::{Descriptor, TypePos, Typedesc};
use sedge_protocol::descriptors::{ObjectShapeDescriptor, ShapeElement};
use sedge_protocol::descriptors::{ObjectTypeDescriptor, ScalarTypeDescriptor};
use sedge_protocol::encoding::Input;
use sedge_protocol::errors::DecodeError;
use sedge_protocol::features::ProtocolVersion;
use sedge_protocol::value::Value;

macro_rules! bconcat {
    ($($part:expr)*) => {{
        let mut buf = Vec::new();
        $( buf.extend_from_slice($part); )*
        buf
    }};
}

fn decode(bytes: &[u8]) -> Result<Vec<Descriptor>, DecodeError> {
    let bytes = Bytes::copy_from_slice(bytes);
    let mut input = Input::new(ProtocolVersion::new(2, 0), bytes);
    let mut result = Vec::new();
    while input.remaining() > 0 {
        result.push(Descriptor::decode(&mut input)?);
    }
    assert!(input.remaining() == 0);
    Ok(result)
}

#[test]
fn single_int() -> Result<(), Box<dyn Error>> {
    assert_eq!(
        decode(b"\0\0\0\"\x03\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05\0\0\0\nstd::int64\x01\0\0")?,
        vec![Descriptor::Scalar(ScalarTypeDescriptor {
            id: "00000000-0000-0000-0000-000000000105".parse::<Uuid>()?,
            name: String::from("std::int64"),
            schema_defined: true,
            ancestors: vec![],
        })]
    );
    Ok(())
}

#[test]
fn single_derived_int() -> Result<(), Box<dyn Error>> {
    let descriptors = decode(&bconcat!(
        b"\0\0\0\"\x03\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05\0\0\0\n"
        b"std::int64\x01\0\0\0\0\0)\x03\x91v\xff\x8c\x95\xb6\x11\xef\x9c"
        b" [\x0e\x8c=\xaa\xc8\0\0\0\x0fdefault::my_int\x01\0\x01\0\0\0\0\0"
        b"-\x03J\xa0\x08{\x95\xb7\x11\xef\xbd\xe2?\xfa\xe3\r\x13\xe9\0\0\0"
        b"\x11default::my_int_2\x01\0\x02\0\x01\0\0"
    ))?;
    assert_eq!(
        descriptors,
        vec![
            Descriptor::Scalar(ScalarTypeDescriptor {
                id: "00000000-0000-0000-0000-000000000105".parse::<Uuid>()?,
                name: String::from("std::int64"),
                schema_defined: true,
                ancestors: vec![],
            }),
            Descriptor::Scalar(ScalarTypeDescriptor {
                id: "9176ff8c-95b6-11ef-9c20-5b0e8c3daac8".parse::<Uuid>()?,
                name: String::from("default::my_int"),
                schema_defined: true,
                ancestors: vec![TypePos(0)],
            }),
            Descriptor::Scalar(ScalarTypeDescriptor {
                id: "4aa0087b-95b7-11ef-bde2-3ffae30d13e9".parse::<Uuid>()?,
                name: String::from("default::my_int_2"),
                schema_defined: true,
                ancestors: vec![TypePos(1), TypePos(0)],
            }),
        ]
    );
    // The codec of a derived scalar is the codec of its base type.
    let Descriptor::Scalar(derived) = &descriptors[2] else {
        panic!("expected scalar");
    };
    assert_eq!(derived.base_type_pos(), Some(TypePos(0)));
    Ok(())
}

#[test]
fn object_shape() -> Result<(), Box<dyn Error>> {
    use sedge_protocol::common::Cardinality::*;
    // SELECT Foo {
    //   id,
    //   title,
    //   [IS Bar].body,
    // }
    assert_eq!(
        decode(&bconcat!(
            b"\0\0\0 \x03\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x01\0\0\0\x08"
            b"std::str\x01\0\0\0\0\0!\x03\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01"
            b"\0\0\0\0\tstd::uuid\x01\0\0\0\0\0\"\n\xc3\xcc\xa7R\x95\xb7"
            b"\x11\xef\xb4\x87\x1d\x1b\x9f\xa20\x03\0\0\0\x0cdefault::Foo"
            b"\x01\0\0\0\"\n\r\xdc\xd7\x1e\x95\xb8\x11\xef\x82M!7\x80\\^4"
            b"\0\0\0\x0cdefault::Bar\x01\0\0\0^\x01\x1dMg\xe7{\xdd]9\x90\x97"
            b"O\x82\xfa\xd8\xaf7\0\0\x02\0\x04\0\0\0\x01A\0\0\0\t__tname__"
            b"\0\0\0\x02\0\0\0\0A\0\0\0\x02id\0\x01\0\x02\0\0\0\0o\0\0\0\x05"
            b"title\0\0\0\x02\0\0\0\0o\0\0\0\x04body\0\0\0\x03"
        ))?,
        vec![
            Descriptor::Scalar(ScalarTypeDescriptor {
                id: "00000000-0000-0000-0000-000000000101".parse::<Uuid>()?,
                name: String::from("std::str"),
                schema_defined: true,
                ancestors: vec![],
            }),
            Descriptor::Scalar(ScalarTypeDescriptor {
                id: "00000000-0000-0000-0000-000000000100".parse::<Uuid>()?,
                name: String::from("std::uuid"),
                schema_defined: true,
                ancestors: vec![],
            }),
            Descriptor::Object(ObjectTypeDescriptor {
                id: "c3cca752-95b7-11ef-b487-1d1b9fa23003".parse::<Uuid>()?,
                name: String::from("default::Foo"),
                schema_defined: true,
            }),
            Descriptor::Object(ObjectTypeDescriptor {
                id: "0ddcd71e-95b8-11ef-824d-2137805c5e34".parse::<Uuid>()?,
                name: String::from("default::Bar"),
                schema_defined: true,
            }),
            Descriptor::ObjectShape(ObjectShapeDescriptor {
                id: "1d4d67e7-7bdd-5d39-9097-4f82fad8af37".parse::<Uuid>()?,
                ephemeral_free_shape: false,
                type_pos: Some(TypePos(2)),
                elements: vec![
                    ShapeElement {
                        flag_implicit: true,
                        flag_link_property: false,
                        flag_link: false,
                        cardinality: Some(One),
                        name: String::from("__tname__"),
                        type_pos: TypePos(0),
                        source_type_pos: Some(TypePos(2)),
                    },
                    ShapeElement {
                        flag_implicit: false,
                        flag_link_property: false,
                        flag_link: false,
                        cardinality: Some(One),
                        name: String::from("id"),
                        type_pos: TypePos(1),
                        source_type_pos: Some(TypePos(2)),
                    },
                    ShapeElement {
                        flag_implicit: false,
                        flag_link_property: false,
                        flag_link: false,
                        cardinality: Some(AtMostOne),
                        name: String::from("title"),
                        type_pos: TypePos(0),
                        source_type_pos: Some(TypePos(2)),
                    },
                    ShapeElement {
                        flag_implicit: false,
                        flag_link_property: false,
                        flag_link: false,
                        cardinality: Some(AtMostOne),
                        name: String::from("body"),
                        type_pos: TypePos(0),
                        source_type_pos: Some(TypePos(3)),
                    },
                ]
            })
        ]
    );
    Ok(())
}

#[test]
fn build_codec_for_root() -> Result<(), Box<dyn Error>> {
    let data =
        b"\0\0\0\"\x03\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05\0\0\0\nstd::int64\x01\0\0";
    let root_id: Uuid = "00000000-0000-0000-0000-000000000105".parse()?;
    let mut input = Input::new(ProtocolVersion::new(2, 0), Bytes::copy_from_slice(data));
    let typedesc = Typedesc::decode_with_id(root_id, &mut input)?;
    assert_eq!(typedesc.root_pos(), Some(TypePos(0)));
    let codec = sedge_protocol::codec::build_codec(typedesc.root_pos(), typedesc.descriptors())?;
    assert_eq!(codec.decode(b"\0\0\0\0\0\0\0\x7b")?, Value::Int64(123));
    Ok(())
}
