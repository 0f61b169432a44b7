//! Multichunk containers as stored in the remote.

use crate::error::{ProtocolError, ProtocolResult};
use crate::file::{Checksum, MultiChunkId};
use serde::{Deserialize, Serialize};

/// One chunk and its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkData {
    /// Chunk checksum.
    pub checksum: Checksum,
    /// Raw bytes.
    pub data: Vec<u8>,
}

/// A bundle of chunks, the unit of content transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiChunk {
    /// Container id.
    pub id: MultiChunkId,
    /// Bundled chunks.
    pub chunks: Vec<ChunkData>,
}

impl MultiChunk {
    /// Returns the bytes of a chunk stored in this container.
    pub fn chunk(&self, checksum: &Checksum) -> Option<&[u8]> {
        self.chunks
            .iter()
            .find(|c| &c.checksum == checksum)
            .map(|c| c.data.as_slice())
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(ProtocolError::codec)?;
        Ok(buf)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(ProtocolError::codec)
    }
}
