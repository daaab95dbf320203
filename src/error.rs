use quick_error::quick_error;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        /// An error from the underlying storage environment.
        IO(err: std::io::Error) {
            from()
            source(err)
            display("I/O operation error: {}", err)
        }
        /// Persisted data failed validation (bad checksum, unknown manifest
        /// tag, truncated record, ...).
        Corruption(msg: String) {
            display("data corruption: {}", msg)
        }
        /// The requested entity does not exist.
        NotFound(msg: String) {
            display("not found: {}", msg)
        }
        /// The caller supplied something unusable, e.g. a comparator whose
        /// name does not match the one the database was created with.
        InvalidArgument(msg: String) {
            display("invalid argument: {}", msg)
        }
        /// Persisted text was not valid UTF-8.
        UTF8Error(err: std::string::FromUtf8Error) {
            from()
            source(err)
            display("invalid utf8: {}", err)
        }
        /// Anything the variants above do not cover.
        Customized(msg: String) {
            display("{}", msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
