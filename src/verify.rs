//! Whole-file verification: every hunk is decoded in order and fed to the
//! digests the header carries, then the metadata is folded in for V4 and V5.

use crate::error::{Error, Result};
use crate::header::{hunk_count, Header, V1, V2, V3};
use crate::hunk::HunkReader;
use crate::map::Map;
use crate::metadata::{combined_sha1, read_chain};
use crate::utils::*;
use crate::R;
use log::{debug, info, warn};
use sha1::Sha1;

#[derive(Clone, Debug)]
pub struct VerifyOptions {
    /// Stop at the first failing hunk. Otherwise every hunk is read and the
    /// first failure is reported at the end.
    pub fail_fast: bool,
    /// Hunks decoded together with the `parallel` feature. 1 decodes on the
    /// calling thread.
    pub batch_size: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            fail_fast: true,
            batch_size: 64,
        }
    }
}

/// Digests over the logical data, as many as the version defines.
struct DataDigest {
    md5: Option<md5::Context>,
    sha1: Option<Sha1>,
}

impl DataDigest {
    fn new(version: u32) -> Self {
        match version {
            V1 | V2 => Self {
                md5: Some(md5::Context::new()),
                sha1: None,
            },
            V3 => Self {
                md5: Some(md5::Context::new()),
                sha1: Some(Sha1::new()),
            },
            _ => Self {
                md5: None,
                sha1: Some(Sha1::new()),
            },
        }
    }

    fn update(&mut self, data: &[u8]) {
        if let Some(md5) = self.md5.as_mut() {
            md5.consume(data);
        }
        if let Some(sha1) = self.sha1.as_mut() {
            sha1.update(data);
        }
    }

    /// Compares against the header. Returns the raw SHA1, if computed.
    fn check(self, header: &Header) -> Result<Option<[u8; 20]>> {
        if let Some(md5) = self.md5 {
            let digest = md5.compute().0;
            check_digest("MD5", &digest, &header.md5)?;
        }
        match self.sha1 {
            Some(sha1) => {
                let digest = sha1.digest().bytes();
                let expected = if header.version == V3 {
                    &header.sha1
                } else {
                    &header.rawsha1
                };
                check_digest("SHA1", &digest, expected)?;
                Ok(Some(digest))
            }
            None => Ok(None),
        }
    }
}

fn check_digest(name: &str, computed: &[u8], expected: &[u8]) -> Result<()> {
    if computed != expected {
        let msg = format!(
            "{} {} doesn't match {}",
            name,
            hex_string(computed),
            hex_string(expected)
        );
        warn!("verify: {}", msg);
        return Err(decompression_error(msg));
    }
    Ok(())
}

/// Running state fed with hunks in ascending order.
struct Progress {
    digest: DataDigest,
    remaining: u64,
    first_error: Option<Error>,
    fail_fast: bool,
}

impl Progress {
    fn new(header: &Header, options: &VerifyOptions) -> Self {
        Self {
            digest: DataDigest::new(header.version),
            remaining: header.size,
            first_error: None,
            fail_fast: options.fail_fast,
        }
    }

    fn is_done(&self) -> bool {
        self.remaining == 0
    }

    fn hunk_done(&mut self, result: Result<&[u8]>) -> Result<()> {
        match result {
            Ok(data) => {
                let take = (data.len() as u64).min(self.remaining) as usize;
                self.digest.update(&data[..take]);
                self.remaining -= take as u64;
            }
            Err(e) => {
                warn!("verify: {}", e);
                if self.fail_fast {
                    return Err(e);
                }
                self.first_error.get_or_insert(e);
            }
        }
        Ok(())
    }
}

fn logical_hunks(header: &Header) -> u32 {
    hunk_count(header.size, header.hunkbytes).min(header.hunkcount as u64) as u32
}

pub fn verify<T: R>(
    io: &mut T,
    header: &Header,
    map: &Map,
    reader: &mut HunkReader,
    filesize: u64,
    options: &VerifyOptions,
) -> Result<()> {
    let result = verify_inner(io, header, map, reader, filesize, options);
    match &result {
        Ok(()) => info!("verify: v{} file is valid", header.version),
        Err(e) => info!("verify: v{} file failed: {}", header.version, e),
    }
    result
}

fn verify_hunks<T: R>(
    io: &mut T,
    header: &Header,
    map: &Map,
    reader: &mut HunkReader,
    filesize: u64,
    progress: &mut Progress,
) -> Result<()> {
    let mut buffer = alloc_buffer(header.hunkbytes as usize)?;
    for hunknum in 0..logical_hunks(header) {
        let result = reader
            .read(io, map, filesize, hunknum, &mut buffer)
            .map(|_| &buffer[..]);
        progress.hunk_done(result)?;
    }
    Ok(())
}

fn verify_inner<T: R>(
    io: &mut T,
    header: &Header,
    map: &Map,
    reader: &mut HunkReader,
    filesize: u64,
    options: &VerifyOptions,
) -> Result<()> {
    let mut progress = Progress::new(header, options);
    debug!("verify: {} hunks", logical_hunks(header));

    #[cfg(feature = "parallel")]
    {
        if options.batch_size > 1 {
            parallel::verify_hunks(io, header, map, filesize, options, &mut progress)?;
        } else {
            verify_hunks(io, header, map, reader, filesize, &mut progress)?;
        }
    }
    #[cfg(not(feature = "parallel"))]
    verify_hunks(io, header, map, reader, filesize, &mut progress)?;

    if let Some(e) = progress.first_error {
        return Err(e);
    }
    if !progress.is_done() {
        return Err(invalid_data(format!(
            "verify: {} bytes of logical data not covered by the map",
            progress.remaining
        )));
    }

    let rawsha1 = progress.digest.check(header)?;
    if header.version > V3 {
        let metadata = read_chain(io, header.metaoffset, filesize)?;
        let rawsha1 = rawsha1.unwrap_or(header.rawsha1);
        let combined = combined_sha1(&rawsha1, &metadata);
        check_digest("combined SHA1", &combined, &header.sha1)?;
    }
    Ok(())
}

#[cfg(feature = "parallel")]
mod parallel {
    use super::*;
    use crate::decompress::Codecs;
    use crate::hunk::{decode, read_payload, resolve};
    use crate::map::MapEntry;
    use rayon::prelude::*;

    type Job = Result<(MapEntry, Vec<u8>)>;

    // Payloads are read in order on the calling thread, decoded on the pool
    // with one codec set per worker, then digested in order.
    pub(super) fn verify_hunks<T: R>(
        io: &mut T,
        header: &Header,
        map: &Map,
        filesize: u64,
        options: &VerifyOptions,
        progress: &mut Progress,
    ) -> Result<()> {
        // fail early on codec setup instead of in every worker
        Codecs::new(header)?;

        let hunks = logical_hunks(header);
        let batch_size = options.batch_size.max(1) as u32;
        let mut start = 0;
        while start < hunks {
            let end = hunks.min(start + batch_size);
            let jobs: Vec<(u32, Job)> = (start..end)
                .map(|hunknum| {
                    let job = resolve(map, hunknum).and_then(|(_, entry)| {
                        let mut payload = Vec::new();
                        read_payload(io, &entry, header.hunkbytes, filesize, &mut payload)?;
                        Ok((entry, payload))
                    });
                    (hunknum, job)
                })
                .collect();

            let results: Vec<Result<Vec<u8>>> = jobs
                .into_par_iter()
                .map_init(
                    || Codecs::new(header),
                    |codecs, (hunknum, job)| {
                        let decoded = job.and_then(|(entry, payload)| {
                            let codecs = codecs
                                .as_mut()
                                .map_err(|e| Error::OutOfMemory(e.to_string()))?;
                            let mut dest = alloc_buffer(header.hunkbytes as usize)?;
                            decode(&entry, &payload, codecs, &mut dest)?;
                            Ok(dest)
                        });
                        decoded.map_err(|e| e.at_hunk(hunknum))
                    },
                )
                .collect();

            for result in results {
                match result {
                    Ok(data) => progress.hunk_done(Ok(&data[..]))?,
                    Err(e) => progress.hunk_done(Err(e))?,
                }
            }
            start = end;
        }
        Ok(())
    }
}
