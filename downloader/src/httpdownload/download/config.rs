pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;
/// Used when neither the response nor the url suggest a filename
pub const DEFAULT_FILE_NAME: &str = "update-installer";

#[derive(Debug, Clone)]
pub struct HttpDownloadConfig {
    /// Bytes written (and reported) per progress step
    pub chunk_size: usize,
    pub remove_partial_on_cancel: bool,
    pub default_filename: String,
}

impl Default for HttpDownloadConfig {
    fn default() -> Self {
        HttpDownloadConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            remove_partial_on_cancel: true,
            default_filename: DEFAULT_FILE_NAME.to_owned(),
        }
    }
}

impl HttpDownloadConfig {
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}
