/// A structure to manage the flashing procedure progress reporting.
///
/// Holds a handler closure called for every event of a flashing run.
///
/// # Example
///
/// ```
/// use cclib::flashing::FlashProgress;
///
/// // Print events
/// let progress = FlashProgress::new(|event| println!("Event: {:#?}", event));
/// ```
pub struct FlashProgress {
    handler: Box<dyn Fn(ProgressEvent)>,
}

impl FlashProgress {
    /// Create a new `FlashProgress` structure with a given `handler` to be called on events.
    pub fn new(handler: impl Fn(ProgressEvent) + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Emit a flashing progress event.
    fn emit(&self, event: ProgressEvent) {
        (self.handler)(event);
    }

    pub(super) fn started(&self, address: u32, total: usize) {
        self.emit(ProgressEvent::Started { address, total });
    }

    pub(super) fn chunk_programmed(&self, address: u32, size: usize) {
        self.emit(ProgressEvent::ChunkProgrammed { address, size });
    }

    pub(super) fn verify_retry(&self, address: u32, attempt: u32) {
        self.emit(ProgressEvent::VerifyRetry { address, attempt });
    }

    pub(super) fn finished(&self) {
        self.emit(ProgressEvent::Finished);
    }

    pub(super) fn failed(&self) {
        self.emit(ProgressEvent::Failed);
    }
}

impl std::fmt::Debug for FlashProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FlashProgress")
    }
}

/// Possible events during a CODE write.
///
/// If flashing works without problems, the events will arrive in the
/// following order:
///
/// * `Started`
/// * `ChunkProgrammed` for every chunk
/// * `Finished`
///
/// A `VerifyRetry` precedes every repeated attempt of a chunk. If an error
/// occurs, `Failed` is emitted and no further events follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Writing started.
    Started {
        /// Flash address of the first byte.
        address: u32,
        /// Number of bytes that will be written.
        total: usize,
    },
    /// A chunk has been written (and verified, if requested).
    ChunkProgrammed {
        /// Flash address of the chunk.
        address: u32,
        /// The size of the chunk in bytes.
        size: usize,
    },
    /// The read back of a chunk did not match and the chunk is written again.
    VerifyRetry {
        address: u32,
        /// Number of the upcoming retry, starting at 1.
        attempt: u32,
    },
    /// Writing failed.
    Failed,
    /// Writing has finished successfully.
    Finished,
}
