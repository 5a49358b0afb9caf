//! Native-endian wire helpers for halo and collective payloads.
//!
//! Payloads are flat arrays of `f64` or `u64`; `bytemuck` casts them to and
//! from bytes without copying on the send side, in the host byte order, so
//! every rank of a run must share one endianness. Decoding copies into an
//! aligned vector since received buffers carry no alignment guarantee.

use crate::mesh_error::MeshError;
use bytemuck::Pod;

pub fn encode_f64(values: &[f64]) -> &[u8] {
    bytemuck::cast_slice(values)
}

pub fn encode_u64(values: &[u64]) -> &[u8] {
    bytemuck::cast_slice(values)
}

fn decode<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, MeshError> {
    expect_multiple_of(bytes.len(), size_of::<T>())?;
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

pub fn decode_f64(bytes: &[u8]) -> Result<Vec<f64>, MeshError> {
    decode(bytes)
}

pub fn decode_u64(bytes: &[u8]) -> Result<Vec<u64>, MeshError> {
    decode(bytes)
}

pub fn expect_multiple_of(actual: usize, record: usize) -> Result<(), MeshError> {
    if actual % record == 0 {
        Ok(())
    } else {
        Err(MeshError::Comm(format!(
            "payload of {actual} bytes is not a whole number of {record}-byte records"
        )))
    }
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), MeshError> {
    if actual == expected {
        Ok(())
    } else {
        Err(MeshError::Comm(format!(
            "expected {expected} values, got {actual}"
        )))
    }
}
