//! Decompression module
//!
//! Unpacks downloaded image containers (XZ, GZ, BZ2, ZST or raw) while
//! hashing the output, then checks the SHA-256 against the manifest.
//! Everything here is blocking; callers run it on a blocking thread.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use lzma_rust2::XzReaderMt;
use sha2::{Digest, Sha256};
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::config;
use crate::runner::CHECKSUM_MISMATCH_MARKER;
use crate::utils::{get_recommended_threads, ProgressTracker};
use crate::{log_error, log_info};

const MODULE: &str = "decompress";

/// Container format of a downloaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Xz,
    Gzip,
    Bzip2,
    Zstd,
}

impl Compression {
    /// Detect the format from a file name or URL extension
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        if lower.ends_with(".xz") {
            Compression::Xz
        } else if lower.ends_with(".gz") {
            Compression::Gzip
        } else if lower.ends_with(".bz2") {
            Compression::Bzip2
        } else if lower.ends_with(".zst") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// File extension including the dot, empty for raw images
    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Xz => ".xz",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
            Compression::Zstd => ".zst",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Compression::None => "raw",
            Compression::Xz => "xz",
            Compression::Gzip => "gz",
            Compression::Bzip2 => "bz2",
            Compression::Zstd => "zstd",
        }
    }
}

/// What an unpacked image must look like
pub struct UnpackTarget<'a> {
    pub name: &'a str,
    /// Unpacked size, used for progress
    pub size: u64,
    /// Expected SHA-256, hex
    pub checksum: &'a str,
}

/// Unpack `input_path` into `output_path`, verifying the checksum
///
/// The output only appears at `output_path` once it has been verified.
pub fn unpack_image(
    input_path: &Path,
    output_path: &Path,
    compression: Compression,
    target: &UnpackTarget<'_>,
    on_progress: &dyn Fn(f64),
) -> Result<(), String> {
    let input_file =
        File::open(input_path).map_err(|e| format!("Failed to open input file: {}", e))?;
    let buf_reader = BufReader::with_capacity(config::download::DECOMPRESS_BUFFER_SIZE, input_file);

    log_info!(
        MODULE,
        "Unpacking {} ({}): {}",
        target.name,
        compression.name(),
        input_path.display()
    );

    match compression {
        Compression::None => {
            unpack_with_reader(buf_reader, output_path, compression, target, on_progress)
        }
        Compression::Xz => {
            let threads = get_recommended_threads();
            log_info!(MODULE, "Using lzma-rust2 with {} threads", threads);
            // XzReaderMt needs Seek + Read, so it takes the file directly
            let input_file = File::open(input_path)
                .map_err(|e| format!("Failed to open input file: {}", e))?;
            let decoder = XzReaderMt::new(input_file, false, threads as u32)
                .map_err(|e| format!("Failed to create XZ decoder: {}", e))?;
            unpack_with_reader(decoder, output_path, compression, target, on_progress)
        }
        Compression::Gzip => unpack_with_reader(
            GzDecoder::new(buf_reader),
            output_path,
            compression,
            target,
            on_progress,
        ),
        Compression::Bzip2 => unpack_with_reader(
            BzDecoder::new(buf_reader),
            output_path,
            compression,
            target,
            on_progress,
        ),
        Compression::Zstd => {
            let decoder = ZstdDecoder::new(buf_reader)
                .map_err(|e| format!("Failed to create zstd decoder: {}", e))?;
            unpack_with_reader(decoder, output_path, compression, target, on_progress)
        }
    }
}

fn unpack_with_reader<R: Read>(
    mut decoder: R,
    output_path: &Path,
    compression: Compression,
    target: &UnpackTarget<'_>,
    on_progress: &dyn Fn(f64),
) -> Result<(), String> {
    let temp_path = output_path.with_extension("unpacking");
    let output_file =
        File::create(&temp_path).map_err(|e| format!("Failed to create output file: {}", e))?;

    let mut buf_writer =
        BufWriter::with_capacity(config::download::DECOMPRESS_BUFFER_SIZE, output_file);
    let mut buffer = vec![0u8; config::download::CHUNK_SIZE];
    let mut hasher = Sha256::new();
    let mut tracker = ProgressTracker::new(
        &format!("Unpack {}", target.name),
        MODULE,
        target.size,
        config::logging::UNPACK_LOG_INTERVAL_MB,
    );

    let result = (|| {
        loop {
            let bytes_read = decoder
                .read(&mut buffer)
                .map_err(|e| format!("{} decompression error: {}", compression.name(), e))?;
            if bytes_read == 0 {
                break;
            }

            hasher.update(&buffer[..bytes_read]);
            buf_writer
                .write_all(&buffer[..bytes_read])
                .map_err(|e| format!("Failed to write unpacked data: {}", e))?;
            on_progress(tracker.update(bytes_read as u64));
        }

        buf_writer
            .flush()
            .map_err(|e| format!("Failed to flush output: {}", e))
    })();
    drop(buf_writer);

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    tracker.finish();

    let actual = hex::encode(hasher.finalize());
    let expected = target.checksum.to_lowercase();
    if actual != expected {
        log_error!(
            MODULE,
            "SHA256 verification FAILED for {}! Expected: {}, Got: {}",
            target.name,
            expected,
            actual
        );
        let _ = std::fs::remove_file(&temp_path);
        return Err(format!(
            "{}: expected {}, got {}",
            CHECKSUM_MISMATCH_MARKER, expected, actual
        ));
    }

    std::fs::rename(&temp_path, output_path)
        .map_err(|e| format!("Failed to move unpacked file: {}", e))?;
    on_progress(1.0);

    log_info!(MODULE, "SHA256 verification PASSED for {}", target.name);
    Ok(())
}
