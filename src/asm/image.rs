//! Raw binary program images.
//!
//! An image is a sequence of 19-byte instruction records, nothing else —
//! no header, no relocation. The loader copies it into code memory and the
//! CPU fetches at byte offset `pc * 19`.

use crate::isa::{Instruction, INSTRUCTION_WIDTH};
use std::path::Path;
use thiserror::Error;

/// Serialize instructions to image bytes.
pub fn encode_image(instructions: &[Instruction]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(instructions.len() * INSTRUCTION_WIDTH);
    for instr in instructions {
        bytes.extend_from_slice(&instr.encode());
    }
    bytes
}

/// Deserialize image bytes into instructions.
///
/// The byte length must be a whole number of records; a trailing partial
/// record means the file is not an image.
pub fn decode_image(bytes: &[u8]) -> Result<Vec<Instruction>, ImageError> {
    if bytes.len() % INSTRUCTION_WIDTH != 0 {
        return Err(ImageError::TruncatedRecord { size: bytes.len() });
    }

    let mut instructions = Vec::with_capacity(bytes.len() / INSTRUCTION_WIDTH);
    for chunk in bytes.chunks_exact(INSTRUCTION_WIDTH) {
        let mut record = [0u8; INSTRUCTION_WIDTH];
        record.copy_from_slice(chunk);
        instructions.push(Instruction::decode(&record));
    }
    Ok(instructions)
}

/// Load a program image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Vec<Instruction>, ImageError> {
    let bytes = std::fs::read(path.as_ref()).map_err(|e| ImageError::Io(e.to_string()))?;
    decode_image(&bytes)
}

/// Save a program image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, instructions: &[Instruction]) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), encode_image(instructions))
        .map_err(|e| ImageError::Io(e.to_string()))
}

/// Errors that can occur loading or saving images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("image size {size} is not a whole number of 19-byte records")]
    TruncatedRecord { size: usize },
}
