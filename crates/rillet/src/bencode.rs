//! A dynamically shaped bencode document.
//!
//! Most of the crate decodes bencode straight into typed structs with
//! [`FromBencode`], as [`crate::metainfo`] does. Some payloads, like tracker
//! responses, are easier to inspect as a tree first. [`Value`] is that tree,
//! and its accessors fail with an explicit [`Error`] when the shape is not the
//! one asked for.

use std::collections::BTreeMap;

use bendy::decoding::{self, FromBencode, Object};

use crate::error::Error;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl FromBencode for Value {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let value = match object {
            integer @ Object::Integer(_) => {
                Value::Integer(i64::decode_bencode_object(integer)?)
            }
            Object::Bytes(bytes) => Value::Bytes(bytes.to_vec()),
            Object::List(mut list_dec) => {
                let mut list = Vec::new();
                while let Some(item) = list_dec.next_object()? {
                    list.push(Value::decode_bencode_object(item)?);
                }
                Value::List(list)
            }
            Object::Dict(mut dict_dec) => {
                let mut dict = BTreeMap::new();
                while let Some((key, item)) = dict_dec.next_pair()? {
                    dict.insert(key.to_vec(), Value::decode_bencode_object(item)?);
                }
                Value::Dict(dict)
            }
        };
        Ok(value)
    }
}

impl Value {
    /// Decode a full buffer into a [`Value`].
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_bencode(buf)?)
    }

    pub fn as_int(&self) -> Result<i64, Error> {
        match self {
            Value::Integer(v) => Ok(*v),
            _ => Err(Error::BencodeShape("integer")),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], Error> {
        match self {
            Value::Bytes(v) => Ok(v),
            _ => Err(Error::BencodeShape("byte string")),
        }
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        std::str::from_utf8(self.as_bytes()?)
            .map_err(|_| Error::BencodeShape("utf-8 string"))
    }

    pub fn as_list(&self) -> Result<&[Value], Error> {
        match self {
            Value::List(v) => Ok(v),
            _ => Err(Error::BencodeShape("list")),
        }
    }

    pub fn as_dict(&self) -> Result<&BTreeMap<Vec<u8>, Value>, Error> {
        match self {
            Value::Dict(v) => Ok(v),
            _ => Err(Error::BencodeShape("dictionary")),
        }
    }

    /// Look up `key` in a dictionary. `Ok(None)` when the key is absent,
    /// an error when `self` is not a dictionary.
    pub fn get(&self, key: &str) -> Result<Option<&Value>, Error> {
        Ok(self.as_dict()?.get(key.as_bytes()))
    }

    /// Like [`Value::get`], but a missing key is an error.
    pub fn require(&self, key: &str) -> Result<&Value, Error> {
        self.get(key)?
            .ok_or_else(|| Error::BencodeMissingKey(key.to_owned()))
    }
}
