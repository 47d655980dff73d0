use sedge_derive::Queryable;
use sedge_protocol::queryable::{Decoder, Queryable};

#[derive(Queryable, Debug, PartialEq)]
struct Row {
    #[sedge(rename = "final")]
    r#final: String,
    count: Option<i64>,
}

#[derive(Queryable, Debug, PartialEq)]
enum Color {
    Red,
    #[sedge(rename = "deep-green")]
    Green,
}

#[test]
fn implicit_fields_are_skipped() {
    // Three wire elements; the first is an implicit field with no slot.
    let args = (vec![None, Some(0_usize), Some(1)], ((), ()));
    let data = b"\0\0\0\x03\
                 \0\0\0\0\0\0\0\x02ok\
                 \0\0\0\0\0\0\0\x03yes\
                 \0\0\0\0\0\0\0\x08\0\0\0\0\0\0\0\x2a";
    let res = Row::decode(&Decoder::default(), &args, data).unwrap();
    assert_eq!(
        res,
        Row {
            r#final: "yes".into(),
            count: Some(42),
        }
    );
}

#[test]
fn optional_field_accepts_null() {
    let args = (vec![Some(0_usize), Some(1)], ((), ()));
    let data = b"\0\0\0\x02\
                 \0\0\0\0\0\0\0\x03yes\
                 \0\0\0\0\xff\xff\xff\xff";
    let res = Row::decode(&Decoder::default(), &args, data).unwrap();
    assert_eq!(
        res,
        Row {
            r#final: "yes".into(),
            count: None,
        }
    );
}

#[test]
fn enum_by_member_name() {
    let decoded = Color::decode(&Decoder::default(), &(), b"Red").unwrap();
    assert_eq!(decoded, Color::Red);
    let decoded = Color::decode(&Decoder::default(), &(), b"deep-green").unwrap();
    assert_eq!(decoded, Color::Green);
    assert!(Color::decode(&Decoder::default(), &(), b"Blue").is_err());
}
