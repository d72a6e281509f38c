//! Serial number allocation.
//!
//! Each CA keeps a cursor that only moves forward. Every certificate the CA
//! signs advances the cursor by a fresh random delta in `[1, 2^40)` and takes
//! the new cursor value as its serial, so serials never repeat within a CA
//! and do not reveal how many certificates were issued.
//!
//! Randomness comes through [`SerialSource`]. Production code uses
//! [`OsSerialSource`] (OpenSSL's CSPRNG); tests script the draws with
//! `ScriptedSerialSource`, available with the `test-utils` feature.

use crate::chain_state::{CaRecord, SerialCursor};
use crate::error::{CaError, Result};
use openssl::bn::{BigNum, BigNumRef};
#[cfg(any(test, feature = "test-utils"))]
use std::collections::VecDeque;

/// Draws are taken from `[0, 2^SERIAL_SPACE_BITS)`.
pub const SERIAL_SPACE_BITS: i32 = 40;

/// Serial of every root certificate.
pub const ROOT_SERIAL: u32 = 1;

const MAX_DRAW_ATTEMPTS: usize = 16;

/// Source of uniformly distributed integers below a bound.
pub trait SerialSource {
    /// Return a value in `[0, bound)`.
    fn draw(&mut self, bound: &BigNumRef) -> Result<BigNum>;
}

/// Cryptographically secure draws from OpenSSL.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSerialSource;

impl SerialSource for OsSerialSource {
    fn draw(&mut self, bound: &BigNumRef) -> Result<BigNum> {
        let mut out = BigNum::new().map_err(|e| CaError::signing("Failed to allocate BigNum", e))?;
        bound
            .rand_range(&mut out)
            .map_err(|e| CaError::signing("Failed to draw random serial", e))?;
        Ok(out)
    }
}

/// Replays a fixed list of draws, for reproducible issuance.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default, Clone)]
pub struct ScriptedSerialSource {
    draws: VecDeque<u64>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ScriptedSerialSource {
    pub fn new(draws: impl IntoIterator<Item = u64>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.draws.len()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SerialSource for ScriptedSerialSource {
    fn draw(&mut self, bound: &BigNumRef) -> Result<BigNum> {
        let next = self
            .draws
            .pop_front()
            .ok_or_else(|| CaError::SigningError("serial source exhausted".to_string()))?;
        let value = BigNum::from_slice(&next.to_be_bytes())
            .map_err(|e| CaError::signing("Failed to convert scripted serial", e))?;
        if &*value >= bound {
            return Err(CaError::SigningError(format!(
                "scripted serial {} is outside the serial space",
                next
            )));
        }
        Ok(value)
    }
}

fn serial_space() -> Result<BigNum> {
    let mut bound = BigNum::new().map_err(|e| CaError::signing("Failed to allocate BigNum", e))?;
    bound
        .set_bit(SERIAL_SPACE_BITS)
        .map_err(|e| CaError::signing("Failed to build serial bound", e))?;
    Ok(bound)
}

fn draw_nonzero<S: SerialSource + ?Sized>(source: &mut S) -> Result<BigNum> {
    let bound = serial_space()?;
    for _ in 0..MAX_DRAW_ATTEMPTS {
        let value = source.draw(&bound)?;
        if value.num_bits() > 0 {
            return Ok(value);
        }
        tracing::debug!("zero serial delta drawn, retrying");
    }
    Err(CaError::SigningError(format!(
        "serial source returned zero {} times in a row",
        MAX_DRAW_ATTEMPTS
    )))
}

/// Initial cursor for a new CA record, in `[0, 2^40)`.
pub fn initial_cursor<S: SerialSource + ?Sized>(source: &mut S) -> Result<BigNum> {
    let bound = serial_space()?;
    source.draw(&bound)
}

/// Advance the record's cursor by a non-zero random delta and return the new
/// cursor as the serial for the next certificate.
///
/// Only the in-memory record changes; persisting it is the caller's job once
/// the certificate has been signed.
pub fn next_serial<S: SerialSource + ?Sized>(
    record: &mut CaRecord,
    source: &mut S,
) -> Result<BigNum> {
    let delta = draw_nonzero(source)?;
    let cursor = record.serial_cursor().to_bignum()?;

    let mut next = BigNum::new().map_err(|e| CaError::signing("Failed to allocate BigNum", e))?;
    next.checked_add(&cursor, &delta)
        .map_err(|e| CaError::signing("Failed to advance serial cursor", e))?;

    record.set_serial_cursor(SerialCursor::from_bignum(&next));
    tracing::debug!(serial = %record.serial_cursor().to_hex(), "serial allocated");
    Ok(next)
}

/// Stand-alone serial in `[1, 2^40)` for certificates that have no issuing CA.
pub fn random_serial<S: SerialSource + ?Sized>(source: &mut S) -> Result<BigNum> {
    draw_nonzero(source)
}

/// Serial used by root certificates.
pub fn root_serial() -> Result<BigNum> {
    BigNum::from_u32(ROOT_SERIAL).map_err(|e| CaError::signing("Failed to build root serial", e))
}
