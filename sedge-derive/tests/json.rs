use sedge_derive::Queryable;
use sedge_protocol::queryable::{Decoder, Queryable};
use serde::Deserialize;

#[derive(Debug, PartialEq, Deserialize)]
struct Data {
    field1: u32,
}

#[derive(Queryable, Debug, PartialEq)]
struct ShapeWithJson {
    name: String,
    #[sedge(json)]
    data: Data,
}

#[derive(Queryable, Deserialize, Debug, PartialEq)]
#[sedge(json)]
struct JsonRow {
    field2: u32,
}

#[test]
fn json_field() {
    let data = b"\0\0\0\x02\0\0\0\x19\0\0\0\x02id\0\0\x0e\xda\0\0\0\x10\x01{\"field1\": 123}";
    let order = (vec![Some(0_usize), Some(1)], ((), ()));
    let res = ShapeWithJson::decode(&Decoder::default(), &order, data);
    assert_eq!(
        res.unwrap(),
        ShapeWithJson {
            name: "id".into(),
            data: Data { field1: 123 },
        }
    );
}

#[test]
fn json_row() {
    let data = b"\x01{\"field2\": 234}";
    let res = JsonRow::decode(&Decoder::default(), &(), data);
    assert_eq!(res.unwrap(), JsonRow { field2: 234 });
}
