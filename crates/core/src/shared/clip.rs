use std::sync::Arc;

/// One data-available delivery from a recorder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaChunk {
    data: Vec<u8>,
}

impl MediaChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A finished, immutable recording: the recorder's chunks concatenated in
/// arrival order.
///
/// Cloning is cheap; the payload is shared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clip {
    mime_type: String,
    data: Arc<[u8]>,
    chunk_count: usize,
}

impl Clip {
    pub fn from_chunks(mime_type: impl Into<String>, chunks: &[MediaChunk]) -> Self {
        let total = chunks.iter().map(MediaChunk::len).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in chunks {
            data.extend_from_slice(chunk.data());
        }
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
            chunk_count: chunks.len(),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of recorder chunks the clip was assembled from.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}
