use crate::compression::vbyte::VByte;
use crate::core::types::Offset;

/// Containers are the allocation unit of the update lexicon: large flat
/// byte arrays carved into per-term chunks. A chunk is a 4-byte successor
/// reference followed by its payload of vbyte-coded posting deltas.
pub const CONTAINER_SIZE: usize = 512 * 1024;

/// Payload bytes of a term's first chunk.
pub const INITIAL_CHUNK_SIZE: usize = 15;

/// Payload cap for grown chunks.
pub const MAX_CHUNK_SIZE: usize = 256;

/// Chunk header: successor reference (NO_CHUNK terminates the chain).
pub const CHUNK_HEADER_SIZE: usize = 4;

pub const NO_CHUNK: u32 = u32::MAX;

/// Append-only chunk arena. Chunk references are global byte positions
/// (container index * CONTAINER_SIZE + offset); once written, a chunk's
/// payload bytes and successor pointer are never moved, which is what
/// allows readers to decode a snapshot while the ingest thread appends.
pub struct ChunkStore {
    containers: Vec<Vec<u8>>,
    position_in_current: usize,
}

impl ChunkStore {
    pub fn new() -> Self {
        ChunkStore {
            containers: Vec::new(),
            position_in_current: 0,
        }
    }

    /// Total bytes held by the containers.
    pub fn memory_consumed(&self) -> usize {
        self.containers.len() * CONTAINER_SIZE
    }

    pub fn clear(&mut self) {
        self.containers.clear();
        self.position_in_current = 0;
    }

    /// Carves a fresh chunk of the given payload size, returning its
    /// global reference. The successor field starts out as NO_CHUNK.
    pub fn allocate_chunk(&mut self, payload_size: usize) -> u32 {
        let total = payload_size + CHUNK_HEADER_SIZE;
        debug_assert!(total <= CONTAINER_SIZE);
        if self.containers.is_empty() || self.position_in_current + total > CONTAINER_SIZE {
            self.containers.push(vec![0u8; CONTAINER_SIZE]);
            self.position_in_current = 0;
        }
        let container = self.containers.len() - 1;
        let offset = self.position_in_current;
        self.position_in_current += total;
        let position = (container * CONTAINER_SIZE + offset) as u32;
        self.write_successor(position, NO_CHUNK);
        position
    }

    pub fn write_successor(&mut self, chunk: u32, successor: u32) {
        let (container, offset) = split(chunk);
        self.containers[container][offset..offset + 4].copy_from_slice(&successor.to_le_bytes());
    }

    pub fn successor(&self, chunk: u32) -> u32 {
        let (container, offset) = split(chunk);
        let bytes = &self.containers[container][offset..offset + 4];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Appends one vbyte-coded delta into the chunk at the given payload
    /// offset. The caller has checked capacity.
    pub fn write_delta(&mut self, chunk: u32, payload_offset: usize, delta: Offset) -> usize {
        let (container, offset) = split(chunk);
        let mut encoded = Vec::with_capacity(VByte::MAX_ENCODED_SIZE);
        VByte::encode_into(&mut encoded, delta);
        let start = offset + CHUNK_HEADER_SIZE + payload_offset;
        self.containers[container][start..start + encoded.len()].copy_from_slice(&encoded);
        encoded.len()
    }

    /// Decodes `count` postings from a chunk chain. `chunk_capacity`
    /// reports each chunk's payload size so the walker knows where the
    /// successor takes over.
    pub fn decode_chain(
        &self,
        first_chunk: u32,
        count: usize,
        mut chunk_capacity: impl FnMut(u32) -> usize,
    ) -> Vec<Offset> {
        let mut postings = Vec::with_capacity(count);
        let mut chunk = first_chunk;
        let mut previous = 0u64;
        while chunk != NO_CHUNK && postings.len() < count {
            let capacity = chunk_capacity(chunk);
            let (container, offset) = split(chunk);
            let payload =
                &self.containers[container][offset + CHUNK_HEADER_SIZE..offset + CHUNK_HEADER_SIZE + capacity];
            let mut position = 0;
            while postings.len() < count {
                match VByte::decode_one(&payload[position..]) {
                    Some((delta, consumed)) => {
                        // A zero delta cannot occur in a strictly increasing
                        // list; it marks the unused tail of the chunk.
                        if delta == 0 && !(postings.is_empty() && position == 0) {
                            break;
                        }
                        previous = if postings.is_empty() { delta } else { previous + delta };
                        postings.push(previous);
                        position += consumed;
                    }
                    None => break,
                }
            }
            chunk = self.successor(chunk);
        }
        postings
    }
}

fn split(position: u32) -> (usize, usize) {
    (
        position as usize / CONTAINER_SIZE,
        position as usize % CONTAINER_SIZE,
    )
}
