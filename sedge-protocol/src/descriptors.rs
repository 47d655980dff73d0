/*!
The type descriptor reader.

A [`CommandDataDescription`](crate::server_message::CommandDataDescription)
carries a blob describing the shape of query inputs or outputs as a flat
sequence of nodes. Each node is prefixed with a 32-bit length and carries a
kind tag, a 128-bit type id and kind-specific payload. Nodes refer to
*earlier* nodes by positional index ([`TypePos`]) only, so a single forward
pass materializes every codec.
*/

use bytes::Buf;
use snafu::{ensure, OptionExt};
use uuid::Uuid;

use crate::common::Cardinality;
use crate::encoding::{Decode, Input};
use crate::errors::{self, CodecError, DecodeError};
use crate::features::ProtocolVersion;
use crate::queryable::DescriptorContext;

/// Index of a descriptor node within its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypePos(pub u16);

/// A parsed descriptor stream together with the root it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typedesc {
    pub(crate) proto: ProtocolVersion,
    pub(crate) array: Vec<Descriptor>,
    pub(crate) root_id: Uuid,
    pub(crate) root_pos: Option<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Descriptor {
    Set(SetDescriptor),
    ObjectShape(ObjectShapeDescriptor),
    BaseScalar(BaseScalarTypeDescriptor),
    Scalar(ScalarTypeDescriptor),
    Tuple(TupleTypeDescriptor),
    NamedTuple(NamedTupleTypeDescriptor),
    Array(ArrayTypeDescriptor),
    Enumeration(EnumerationTypeDescriptor),
    InputShape(InputShapeTypeDescriptor),
    Range(RangeTypeDescriptor),
    Object(ObjectTypeDescriptor),
    Compound(CompoundTypeDescriptor),
    MultiRange(MultiRangeTypeDescriptor),
    TypeAnnotation(TypeAnnotationDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDescriptor {
    pub id: Uuid,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShapeDescriptor {
    pub id: Uuid,
    pub ephemeral_free_shape: bool,
    pub type_pos: Option<TypePos>,
    pub elements: Vec<ShapeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputShapeTypeDescriptor {
    pub id: Uuid,
    pub elements: Vec<InputShapeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeElement {
    pub flag_implicit: bool,
    pub flag_link_property: bool,
    pub flag_link: bool,
    pub cardinality: Option<Cardinality>,
    pub name: String,
    pub type_pos: TypePos,
    pub source_type_pos: Option<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputShapeElement {
    pub cardinality: Option<Cardinality>,
    pub name: String,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseScalarTypeDescriptor {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
    pub ancestors: Vec<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
    pub ancestors: Vec<TypePos>,
    pub element_types: Vec<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTupleTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
    pub ancestors: Vec<TypePos>,
    pub elements: Vec<TupleElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleElement {
    pub name: String,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
    pub ancestors: Vec<TypePos>,
    pub type_pos: TypePos,
    pub dimensions: Vec<Option<u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
    pub ancestors: Vec<TypePos>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
    pub ancestors: Vec<TypePos>,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiRangeTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
    pub ancestors: Vec<TypePos>,
    pub type_pos: TypePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
}

/// Compound type operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeOperation {
    Union = 1,
    Intersection = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundTypeDescriptor {
    pub id: Uuid,
    pub name: String,
    pub schema_defined: bool,
    pub op: TypeOperation,
    pub components: Vec<TypePos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotationDescriptor {
    pub annotated_tag: u8,
    pub descriptor: u16,
    pub annotation: String,
}

impl Typedesc {
    pub fn id(&self) -> &Uuid {
        &self.root_id
    }
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.array
    }
    pub fn root_pos(&self) -> Option<TypePos> {
        self.root_pos
    }
    pub fn proto(&self) -> &ProtocolVersion {
        &self.proto
    }
    pub fn get(&self, type_pos: TypePos) -> Result<&Descriptor, CodecError> {
        self.array
            .get(type_pos.0 as usize)
            .context(errors::UnexpectedTypePos {
                position: type_pos.0,
            })
    }
    /// An empty descriptor, describing a query with no inputs or no output.
    pub fn nothing(proto: &ProtocolVersion) -> Typedesc {
        Typedesc {
            proto: proto.clone(),
            array: Vec::new(),
            root_id: Uuid::from_u128(0),
            root_pos: None,
        }
    }
    pub fn is_empty_tuple(&self) -> bool {
        match self.root_pos.map(|p| self.get(p)) {
            Some(Ok(Descriptor::Tuple(t))) => t.element_types.is_empty(),
            _ => self.root_pos.is_none(),
        }
    }

    pub fn decode_with_id(root_id: Uuid, buf: &mut Input) -> Result<Typedesc, DecodeError> {
        let mut array = Vec::new();
        while buf.remaining() > 0 {
            let descriptor = Descriptor::decode(buf)?;
            ensure!(
                array.len() <= u16::MAX as usize,
                errors::TooManyDescriptors { index: array.len() }
            );
            array.push(descriptor);
        }
        let root_pos = array
            .iter()
            .position(|d| d.id() == root_id)
            .map(|pos| TypePos(pos as u16));
        Ok(Typedesc {
            proto: buf.proto().clone(),
            array,
            root_id,
            root_pos,
        })
    }

    pub fn as_queryable_context(&self) -> DescriptorContext {
        DescriptorContext::new(self)
    }
}

impl Descriptor {
    /// The type id this node declares; annotations have none.
    pub fn id(&self) -> Uuid {
        use Descriptor::*;
        match self {
            Set(i) => i.id,
            ObjectShape(i) => i.id,
            BaseScalar(i) => i.id,
            Scalar(i) => i.id,
            Tuple(i) => i.id,
            NamedTuple(i) => i.id,
            Array(i) => i.id,
            Enumeration(i) => i.id,
            InputShape(i) => i.id,
            Range(i) => i.id,
            Object(i) => i.id,
            Compound(i) => i.id,
            MultiRange(i) => i.id,
            TypeAnnotation(..) => Uuid::nil(),
        }
    }

    pub fn decode(buf: &mut Input) -> Result<Descriptor, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let len = buf.get_u32() as usize;
        ensure!(buf.remaining() >= len, errors::Underflow);
        ensure!(len >= 1, errors::Underflow);
        let mut node = Input::new(buf.proto().clone(), buf.copy_to_bytes(len));
        let buf = &mut node;
        use Descriptor as D;
        let result = match buf.get_u8() {
            0 => D::Set(SetDescriptor::decode(buf)?),
            1 => D::ObjectShape(ObjectShapeDescriptor::decode(buf)?),
            2 => D::BaseScalar(BaseScalarTypeDescriptor::decode(buf)?),
            3 => D::Scalar(ScalarTypeDescriptor::decode(buf)?),
            4 => D::Tuple(TupleTypeDescriptor::decode(buf)?),
            5 => D::NamedTuple(NamedTupleTypeDescriptor::decode(buf)?),
            6 => D::Array(ArrayTypeDescriptor::decode(buf)?),
            7 => D::Enumeration(EnumerationTypeDescriptor::decode(buf)?),
            8 => D::InputShape(InputShapeTypeDescriptor::decode(buf)?),
            9 => D::Range(RangeTypeDescriptor::decode(buf)?),
            10 => D::Object(ObjectTypeDescriptor::decode(buf)?),
            11 => D::Compound(CompoundTypeDescriptor::decode(buf)?),
            12 => D::MultiRange(MultiRangeTypeDescriptor::decode(buf)?),
            tag @ 127..=255 => {
                ensure!(buf.remaining() >= 2, errors::Underflow);
                let descriptor = buf.get_u16();
                let annotation = if tag == 255 {
                    String::decode(buf)?
                } else {
                    let rest = buf.copy_to_bytes(buf.remaining());
                    String::from_utf8_lossy(&rest).into_owned()
                };
                D::TypeAnnotation(TypeAnnotationDescriptor {
                    annotated_tag: tag,
                    descriptor,
                    annotation,
                })
            }
            descriptor => return errors::InvalidTypeDescriptor { descriptor }.fail(),
        };
        ensure!(buf.remaining() == 0, errors::ExtraData);
        Ok(result)
    }
}

impl ScalarTypeDescriptor {
    /// Derived scalars decode with the codec of the base type, which is the
    /// last ancestor in resolution order.
    pub fn base_type_pos(&self) -> Option<TypePos> {
        self.ancestors.last().copied()
    }
}

fn decode_type_pos_vec(buf: &mut Input) -> Result<Vec<TypePos>, DecodeError> {
    ensure!(buf.remaining() >= 2, errors::Underflow);
    let count = buf.get_u16();
    ensure!(buf.remaining() >= 2 * count as usize, errors::Underflow);
    Ok((0..count).map(|_| TypePos(buf.get_u16())).collect())
}

fn decode_cardinality(buf: &mut Input) -> Result<Option<Cardinality>, DecodeError> {
    ensure!(buf.remaining() >= 1, errors::Underflow);
    match buf.get_u8() {
        0 => Ok(None),
        card => Cardinality::try_from(card).map(Some),
    }
}

impl Decode for SetDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let type_pos = TypePos(buf.get_u16());
        Ok(SetDescriptor { id, type_pos })
    }
}

impl Decode for ObjectShapeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        ensure!(buf.remaining() >= 5, errors::Underflow);
        let ephemeral_free_shape = buf.get_u8() != 0;
        let type_pos = TypePos(buf.get_u16());
        let element_count = buf.get_u16();
        let mut elements = Vec::with_capacity(element_count as usize);
        for _ in 0..element_count {
            ensure!(buf.remaining() >= 4, errors::Underflow);
            let flags = buf.get_u32();
            let cardinality = decode_cardinality(buf)?;
            let name = String::decode(buf)?;
            ensure!(buf.remaining() >= 4, errors::Underflow);
            let element_type_pos = TypePos(buf.get_u16());
            let source_type_pos = TypePos(buf.get_u16());
            elements.push(ShapeElement {
                flag_implicit: flags & 0b001 != 0,
                flag_link_property: flags & 0b010 != 0,
                flag_link: flags & 0b100 != 0,
                cardinality,
                name,
                type_pos: element_type_pos,
                source_type_pos: Some(source_type_pos),
            });
        }
        Ok(ObjectShapeDescriptor {
            id,
            ephemeral_free_shape,
            type_pos: if ephemeral_free_shape {
                None
            } else {
                Some(type_pos)
            },
            elements,
        })
    }
}

impl Decode for InputShapeTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let element_count = buf.get_u16();
        let mut elements = Vec::with_capacity(element_count as usize);
        for _ in 0..element_count {
            ensure!(buf.remaining() >= 4, errors::Underflow);
            let _flags = buf.get_u32();
            let cardinality = decode_cardinality(buf)?;
            let name = String::decode(buf)?;
            ensure!(buf.remaining() >= 2, errors::Underflow);
            let type_pos = TypePos(buf.get_u16());
            elements.push(InputShapeElement {
                cardinality,
                name,
                type_pos,
            });
        }
        Ok(InputShapeTypeDescriptor { id, elements })
    }
}

impl Decode for BaseScalarTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        Ok(BaseScalarTypeDescriptor { id })
    }
}

impl Decode for ScalarTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        let ancestors = decode_type_pos_vec(buf)?;
        Ok(ScalarTypeDescriptor {
            id,
            name,
            schema_defined,
            ancestors,
        })
    }
}

impl Decode for TupleTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        let ancestors = decode_type_pos_vec(buf)?;
        let element_types = decode_type_pos_vec(buf)?;
        Ok(TupleTypeDescriptor {
            id,
            name,
            schema_defined,
            ancestors,
            element_types,
        })
    }
}

impl Decode for NamedTupleTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        let ancestors = decode_type_pos_vec(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let element_count = buf.get_u16();
        let mut elements = Vec::with_capacity(element_count as usize);
        for _ in 0..element_count {
            let name = String::decode(buf)?;
            ensure!(buf.remaining() >= 2, errors::Underflow);
            let type_pos = TypePos(buf.get_u16());
            elements.push(TupleElement { name, type_pos });
        }
        Ok(NamedTupleTypeDescriptor {
            id,
            name,
            schema_defined,
            ancestors,
            elements,
        })
    }
}

impl Decode for ArrayTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        let ancestors = decode_type_pos_vec(buf)?;
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let type_pos = TypePos(buf.get_u16());
        let dim_count = buf.get_u16();
        ensure!(buf.remaining() >= 4 * dim_count as usize, errors::Underflow);
        let dimensions = (0..dim_count)
            .map(|_| match buf.get_i32() {
                -1 => None,
                n => Some(n as u32),
            })
            .collect();
        Ok(ArrayTypeDescriptor {
            id,
            name,
            schema_defined,
            ancestors,
            type_pos,
            dimensions,
        })
    }
}

impl Decode for EnumerationTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        let ancestors = decode_type_pos_vec(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let member_count = buf.get_u16();
        let mut members = Vec::with_capacity(member_count as usize);
        for _ in 0..member_count {
            members.push(String::decode(buf)?);
        }
        Ok(EnumerationTypeDescriptor {
            id,
            name,
            schema_defined,
            ancestors,
            members,
        })
    }
}

impl Decode for RangeTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        let ancestors = decode_type_pos_vec(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let type_pos = TypePos(buf.get_u16());
        Ok(RangeTypeDescriptor {
            id,
            name,
            schema_defined,
            ancestors,
            type_pos,
        })
    }
}

impl Decode for MultiRangeTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        let ancestors = decode_type_pos_vec(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let type_pos = TypePos(buf.get_u16());
        Ok(MultiRangeTypeDescriptor {
            id,
            name,
            schema_defined,
            ancestors,
            type_pos,
        })
    }
}

impl Decode for ObjectTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        Ok(ObjectTypeDescriptor {
            id,
            name,
            schema_defined,
        })
    }
}

impl Decode for CompoundTypeDescriptor {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let id = Uuid::decode(buf)?;
        let name = String::decode(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let schema_defined = buf.get_u8() != 0;
        let op = match buf.get_u8() {
            1 => TypeOperation::Union,
            2 => TypeOperation::Intersection,
            _ => return errors::InvalidTypeOperation.fail(),
        };
        let components = decode_type_pos_vec(buf)?;
        Ok(CompoundTypeDescriptor {
            id,
            name,
            schema_defined,
            op,
            components,
        })
    }
}
