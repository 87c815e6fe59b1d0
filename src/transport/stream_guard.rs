//! Bandwidth guard for response bodies
//!
//! Bodies are read chunk by chunk and inspected in fixed-size slices. Reading
//! stops early when a slice contains an early-termination marker, or when the
//! body reaches the configured size cap.

use crate::config::BandwidthConfig;

/// Why reading a body stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The server finished sending the body
    Complete,
    /// An early-termination marker was seen
    Marker(String),
    /// The size cap was reached
    SizeLimit,
}

/// Bytes kept from a guarded read
#[derive(Debug)]
pub struct GuardedBody {
    pub bytes: Vec<u8>,
    pub stop: StopReason,
}

/// Chunked reader with early termination
#[derive(Debug, Clone)]
pub struct StreamGuard {
    chunk_size: usize,
    max_bytes: Option<u64>,
    /// (original, lowercased) marker pairs
    markers: Vec<(String, Vec<u8>)>,
    longest_marker: usize,
}

impl StreamGuard {
    pub fn new(chunk_size: usize, max_bytes: Option<u64>, markers: &[String]) -> Self {
        let markers: Vec<(String, Vec<u8>)> = markers
            .iter()
            .filter(|m| !m.is_empty())
            .map(|m| (m.clone(), m.to_ascii_lowercase().into_bytes()))
            .collect();
        let longest_marker = markers.iter().map(|(_, m)| m.len()).max().unwrap_or(0);

        Self {
            chunk_size: chunk_size.max(1),
            max_bytes,
            markers,
            longest_marker,
        }
    }

    pub fn from_config(config: &BandwidthConfig) -> Self {
        let max_bytes = config.abort_on_large.then_some(config.max_page_bytes);
        Self::new(
            config.chunk_size_bytes,
            max_bytes,
            &config.early_termination_markers,
        )
    }

    /// Reads `response` until it completes or a guard trips
    pub async fn read(&self, mut response: reqwest::Response) -> Result<GuardedBody, reqwest::Error> {
        let mut buffer = Vec::new();

        while let Some(chunk) = response.chunk().await? {
            if let Some(stop) = self.feed(&mut buffer, &chunk) {
                tracing::debug!(bytes = buffer.len(), stop = ?stop, "Stopped reading body early");
                return Ok(GuardedBody {
                    bytes: buffer,
                    stop,
                });
            }
        }

        Ok(GuardedBody {
            bytes: buffer,
            stop: StopReason::Complete,
        })
    }

    /// Appends `chunk` to `buffer` slice by slice
    ///
    /// Returns the reason to stop, if any. Marker search overlaps the previous
    /// slice so a marker split across a boundary is still found.
    pub fn feed(&self, buffer: &mut Vec<u8>, chunk: &[u8]) -> Option<StopReason> {
        for slice in chunk.chunks(self.chunk_size) {
            let slice = match self.max_bytes {
                Some(max) => {
                    let room = max.saturating_sub(buffer.len() as u64) as usize;
                    &slice[..slice.len().min(room)]
                }
                None => slice,
            };

            let scan_from = buffer
                .len()
                .saturating_sub(self.longest_marker.saturating_sub(1));
            buffer.extend_from_slice(slice);

            if let Some(marker) = self.find_marker(&buffer[scan_from..]) {
                return Some(StopReason::Marker(marker));
            }

            if let Some(max) = self.max_bytes {
                if buffer.len() as u64 >= max {
                    return Some(StopReason::SizeLimit);
                }
            }
        }

        None
    }

    fn find_marker(&self, window: &[u8]) -> Option<String> {
        if self.markers.is_empty() {
            return None;
        }

        let window = window.to_ascii_lowercase();
        self.markers
            .iter()
            .find(|(_, needle)| contains(&window, needle))
            .map(|(original, _)| original.clone())
    }
}

/// Case-insensitive (ASCII) substring test used for body markers
pub fn contains_marker(haystack: &[u8], marker: &str) -> bool {
    if marker.is_empty() {
        return false;
    }
    contains(
        &haystack.to_ascii_lowercase(),
        marker.to_ascii_lowercase().as_bytes(),
    )
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}
