//! Entry Body - suspended byte stream of one archive entry
//!
//! The archive scanner pushes chunks into a bounded channel and blocks when
//! it is full, so the parser only advances as fast as the upload pulls.
//! Dropping an `EntryBody` drains it: the scanner's next send fails and it
//! skips the rest of the entry.
//!
//! ```text
//! scanner thread ──BodySender──► [bounded chunks] ──EntryBody──► UploadClient
//! ```

use bytes::{Bytes, BytesMut};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use tokio::sync::mpsc;

/// Producer half, owned by the archive scanner
#[derive(Debug)]
pub struct BodySender {
    tx: mpsc::Sender<IoResult<Bytes>>,
}

impl BodySender {
    /// Push one chunk, blocking the calling thread while the queue is full.
    /// Returns false once the body has been dropped.
    ///
    /// Must not be called from inside an async task.
    pub fn send_blocking(&self, chunk: IoResult<Bytes>) -> bool {
        self.tx.blocking_send(chunk).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, handed to the upload client
#[derive(Debug)]
pub struct EntryBody {
    rx: mpsc::Receiver<IoResult<Bytes>>,
    len: u64,
    received: u64,
    started: bool,
}

impl EntryBody {
    /// Create a body of `len` bytes fed through a queue of `depth` chunks
    pub fn channel(len: u64, depth: usize) -> (BodySender, EntryBody) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            BodySender { tx },
            EntryBody {
                rx,
                len,
                received: 0,
                started: false,
            },
        )
    }

    /// Body backed by bytes already in memory
    pub fn from_bytes(data: impl Into<Bytes>) -> EntryBody {
        let data = data.into();
        let (sender, body) = EntryBody::channel(data.len() as u64, 1);
        if !data.is_empty() {
            // Capacity 1 and a fresh channel: this cannot fail.
            let _ = sender.tx.try_send(Ok(data));
        }
        body
    }

    /// Declared size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once any chunk has been pulled; a started body cannot be replayed
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Bytes pulled so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Pull the next chunk. `None` after the last byte.
    pub async fn next_chunk(&mut self) -> Option<IoResult<Bytes>> {
        self.started = true;
        if self.received >= self.len {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => {
                self.received += chunk.len() as u64;
                Some(Ok(chunk))
            }
            Some(Err(e)) => Some(Err(e)),
            None => Some(Err(IoError::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "entry body closed after {} of {} bytes",
                    self.received, self.len
                ),
            ))),
        }
    }

    /// Pull the whole remaining body into one buffer
    pub async fn read_to_end(&mut self) -> IoResult<Bytes> {
        let remaining = self.len.saturating_sub(self.received) as usize;
        let mut buf = BytesMut::with_capacity(remaining);
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}
