//! Request/response headers shared by every API (spec §6).

use bytes::{Buf, BufMut};

use crate::wire::{self, WireResult};

#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl RequestHeader {
    pub fn decode(buf: &mut impl Buf) -> WireResult<Self> {
        Ok(Self {
            api_key: wire::get_i16(buf)?,
            api_version: wire::get_i16(buf)?,
            correlation_id: wire::get_i32(buf)?,
            client_id: wire::get_nullable_string(buf)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResponseHeader {
    pub correlation_id: i32,
}

impl ResponseHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.correlation_id);
    }
}
