mod raw_scalar;

pub use raw_scalar::RawCodec;
