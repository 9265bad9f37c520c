use std::sync::Mutex;

/// COMPACTION_TEMP_EXTENSION is the extension of files being written by a
/// running compaction.  They are renamed to `.tsm` by the file store once
/// durable.
pub const COMPACTION_TEMP_EXTENSION: &str = "tmp";

/// TSM_FILE_EXTENSION is the extension of finalised TSM files.
pub const TSM_FILE_EXTENSION: &str = "tsm";

/// FileStore hands out the monotonically increasing generation numbers
/// that prefix TSM file names.
pub struct FileStore {
    current_generation: Mutex<u64>,
}

impl FileStore {
    pub fn new() -> Self {
        Self {
            current_generation: Mutex::new(0),
        }
    }

    pub fn next_generation(&self) -> u64 {
        let mut generation = self.current_generation.lock().unwrap();
        *generation += 1;
        *generation
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats the temporary name of a TSM file being compacted.
pub fn format_file_name(generation: u64, sequence: u64) -> String {
    format!(
        "{:09}-{:09}.{}.{}",
        generation, sequence, TSM_FILE_EXTENSION, COMPACTION_TEMP_EXTENSION
    )
}
