//! PCM16 little-endian <-> base64, the audio encoding of the realtime wire protocol.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{AgentError, AgentResult};

pub fn encode_pcm16(samples: &[i16]) -> String {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    STANDARD.encode(bytes)
}

pub fn decode_pcm16(encoded: &str) -> AgentResult<Vec<i16>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| AgentError::Model(format!("invalid base64 audio: {}", e)))?;

    if bytes.len() % 2 != 0 {
        return Err(AgentError::Model(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    let mut samples = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(&bytes, &mut samples);
    Ok(samples)
}
