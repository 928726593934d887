//! The fixed request/response `Type`s the RPC layer rides on top of the
//! value codec with, and the pack/unpack helpers shared by the client and
//! server.

use crate::error::RpcStatus;
use crate::types::Type;
use crate::value::Value;

/// `STRUCT { STRING endpoint_name; ARRAY(ARRAY(BYTE)) serialized_args; }`
pub fn request_type() -> Type {
    Type::structure(vec![Type::String, Type::array(Type::array(Type::Byte))])
        .expect("fixed request type is well-formed")
}

/// `STRUCT { BYTE status; ARRAY(BYTE) serialized_return; }`
pub fn response_type() -> Type {
    Type::structure(vec![Type::Byte, Type::array(Type::Byte)])
        .expect("fixed response type is well-formed")
}

/// Serialise a `Value` into a freshly sized buffer, growing until it fits.
fn serialize_with_length(value: &Value) -> Vec<u8> {
    let mut scratch = vec![0u8; 256];
    loop {
        match value.value_to_buffer_with_length(&mut scratch) {
            Ok(written) => {
                scratch.truncate(written);
                return scratch;
            }
            Err(_) => scratch.resize(scratch.len() * 2, 0),
        }
    }
}

/// Build the request `Value`: each argument is independently serialised
/// (including its own `Type`) and wrapped in a byte array.
pub fn build_request(name: &str, args: &[Value]) -> Result<Value, RpcStatus> {
    let arg_entries = args
        .iter()
        .map(|arg| Value::ByteArray(serialize_with_length(arg)))
        .collect();

    let serialized_args = Value::composite_array(Type::array(Type::Byte), arg_entries)
        .map_err(RpcStatus::from)?;
    Value::struct_value(vec![Value::string(name), serialized_args]).map_err(RpcStatus::from)
}

/// Serialise a request/response `Value` (of the fixed protocol `Type`) into `buf`.
pub fn encode(value: &Value, buf: &mut [u8]) -> Result<usize, RpcStatus> {
    value.value_to_buffer(buf).map_err(RpcStatus::from)
}

/// Split a decoded request buffer into the endpoint name and its raw,
/// independently-serialised argument byte strings.
pub fn unpack_request(buf: &[u8]) -> Result<(String, Vec<Vec<u8>>), RpcStatus> {
    let (value, _) = Value::value_from_buffer(&request_type(), buf).map_err(RpcStatus::from)?;
    match value {
        Value::Struct(mut fields) if fields.len() == 2 => {
            let arg_bytes = match fields.pop() {
                Some(Value::CompositeArray { elements, .. }) => elements
                    .into_iter()
                    .map(|entry| match entry {
                        Value::ByteArray(bytes) => Ok(bytes),
                        _ => Err(RpcStatus::BadRequest),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                _ => return Err(RpcStatus::BadRequest),
            };
            let name = match fields.pop() {
                Some(Value::Str(name)) => name,
                _ => return Err(RpcStatus::BadRequest),
            };
            Ok((name, arg_bytes))
        }
        _ => Err(RpcStatus::BadRequest),
    }
}

/// Build the response `Value` carrying `status` and, on success, the
/// independently-serialised return value.
pub fn build_response(status: RpcStatus, ret: Option<&Value>) -> Result<Value, RpcStatus> {
    let ret_bytes = match (status, ret) {
        (RpcStatus::Success, Some(value)) => serialize_with_length(value),
        _ => Vec::new(),
    };

    Value::struct_value(vec![Value::Byte(status.to_wire_byte()), Value::ByteArray(ret_bytes)])
        .map_err(RpcStatus::from)
}

/// Parse a response buffer into its status and raw return-value bytes.
pub fn unpack_response(buf: &[u8]) -> Result<(RpcStatus, Vec<u8>), RpcStatus> {
    let (value, _) = Value::value_from_buffer(&response_type(), buf).map_err(RpcStatus::from)?;
    match value {
        Value::Struct(mut fields) if fields.len() == 2 => {
            let ret_bytes = match fields.pop() {
                Some(Value::ByteArray(bytes)) => bytes,
                _ => return Err(RpcStatus::BadResponse),
            };
            let status = match fields.pop() {
                Some(Value::Byte(b)) => RpcStatus::from_wire_byte(b),
                _ => return Err(RpcStatus::BadResponse),
            };
            Ok((status, ret_bytes))
        }
        _ => Err(RpcStatus::BadResponse),
    }
}
