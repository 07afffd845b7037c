use bytes::Bytes;

pub fn get_test_key(i: usize) -> Bytes {
  Bytes::from(format!("wispkv-key-{:09}", i))
}

pub fn get_test_value(i: usize) -> Bytes {
  Bytes::from(format!("wispkv-value-{:09}", i))
}
