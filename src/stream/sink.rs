//! Raw transport stream file sink.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Appends the TS payload of every dispatched buffer to a file.
///
/// Debug/archival aid: the file holds exactly the bytes the RTP clients
/// receive, minus the RTP headers, so it plays in any TS-aware player.
/// Write failures are logged once and the sink goes quiet; capture must
/// never stall the send loop.
pub struct TsFileSink {
    path: PathBuf,
    file: File,
    failed: bool,
}

impl TsFileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        tracing::info!(path = %path.display(), "TS file sink opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, payload: &[u8]) {
        if self.failed {
            return;
        }
        if let Err(e) = self.file.write_all(payload) {
            tracing::warn!(path = %self.path.display(), error = %e, "TS sink write failed, disabling sink");
            self.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_payload_bytes() {
        let path = std::env::temp_dir().join("satip-sink-test.ts");
        let mut sink = TsFileSink::create(&path).unwrap();
        sink.write(&[0x47, 1, 2, 3]);
        sink.write(&[0x47, 4, 5, 6]);
        drop(sink);

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, vec![0x47, 1, 2, 3, 0x47, 4, 5, 6]);
        let _ = std::fs::remove_file(&path);
    }
}
