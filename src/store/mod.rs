use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex, OwnedMutexGuard},
};

use crate::bet::Bet;

pub mod record;

use record::RecordErr;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("the bet storage is unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("record {line} of the bet storage is corrupted: {reason}")]
    Corrupted { line: usize, reason: RecordErr },
}

/// Append-only set of every bet received, shared by all sessions
///
/// appends and scans never interleave: both run while holding the same
/// exclusive lock, a scan keeps it until it is dropped.
#[derive(Debug, Clone)]
pub struct BetStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl BetStore {
    /// Opens the store backed by the file at `path`, creating an empty one if needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::debug!("opened the bet storage at {}", path.display());

        Ok(Self {
            path: Arc::new(path),
            lock: Arc::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists a batch of bets
    ///
    /// a scan either sees all of the batch or none of it, a batch that fails
    /// halfway through is cut back out of the file.
    pub async fn append(&self, bets: &[Bet]) -> Result<(), StoreError> {
        let records: String = bets.iter().map(record::to_record).collect();

        let _guard = self.lock.lock().await;

        // the file is never re-created, an external cleanup makes the store unavailable
        let mut file = OpenOptions::new().append(true).open(self.path()).await?;
        append_all(&mut file, records.as_bytes()).await?;

        Ok(())
    }

    /// Starts a scan over every persisted bet
    ///
    /// the store stays locked for as long as the returned [`BetScan`] lives.
    pub async fn scan(&self) -> Result<BetScan, StoreError> {
        let guard = self.lock.clone().lock_owned().await;
        let file = File::open(self.path()).await?;

        Ok(BetScan {
            _guard: guard,
            reader: BufReader::new(file),
            line: 0,
        })
    }
}

/// A file that can be cut back to a previous length
#[async_trait]
trait Truncate {
    async fn len(&mut self) -> std::io::Result<u64>;

    async fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

#[async_trait]
impl Truncate for File {
    async fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len).await
    }
}

/// Writes `records` at the end of `file`, leaving it untouched if any byte fails to land
async fn append_all<F>(file: &mut F, records: &[u8]) -> std::io::Result<()>
where
    F: AsyncWrite + Truncate + Unpin + Send,
{
    let len = file.len().await?;

    let written = match file.write_all(records).await {
        // tokio finishes file writes in the background, wait for it to land
        Ok(()) => file.flush().await,
        Err(err) => Err(err),
    };

    if let Err(err) = written {
        if let Err(rollback) = file.truncate(len).await {
            tracing::error!("failed to drop a partially written batch: {}", rollback);
        }
        return Err(err);
    }

    Ok(())
}

/// A lazy pass over the store, records are read from disk as they are requested
#[derive(Debug)]
pub struct BetScan {
    _guard: OwnedMutexGuard<()>,
    reader: BufReader<File>,
    line: usize,
}

impl BetScan {
    /// Reads the next bet, returns None once the end of the store was reached
    pub async fn next_bet(&mut self) -> Option<Result<Bet, StoreError>> {
        loop {
            let raw = match self.read_raw_record().await {
                Ok(Some(raw)) => raw,
                Ok(None) => return None,
                Err(err) => return Some(Err(err)),
            };
            self.line += 1;

            // skip empty lines
            if raw.iter().all(|byte| byte.is_ascii_whitespace()) {
                continue;
            }

            let bet = String::from_utf8(raw)
                .map_err(RecordErr::from)
                .and_then(|record| record::from_record(&record))
                .map_err(|reason| StoreError::Corrupted {
                    line: self.line,
                    reason,
                });

            return Some(bet);
        }
    }

    // a record may span several lines when a quoted field holds a line break
    async fn read_raw_record(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        let mut raw = vec![];
        loop {
            let rcount = self.reader.read_until(b'\n', &mut raw).await?;
            if rcount == 0 || record::is_complete(&raw) {
                break;
            }
        }

        if raw.is_empty() {
            return Ok(None);
        }

        Ok(Some(raw))
    }

    /// Drains the rest of the scan into memory
    pub async fn collect(mut self) -> Result<Vec<Bet>, StoreError> {
        let mut bets = vec![];
        while let Some(bet) = self.next_bet().await {
            bets.push(bet?);
        }

        Ok(bets)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
        time::Duration,
    };

    use async_tempfile::TempFile;
    use async_trait::async_trait;
    use tokio::io::AsyncWrite;

    use super::{append_all, BetStore, StoreError, Truncate};
    use crate::bet::Bet;

    /// An in-memory file that runs out of space after `room` more bytes
    struct FullDisk {
        content: Vec<u8>,
        room: usize,
    }

    impl AsyncWrite for FullDisk {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.room == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "no space left")));
            }

            let wcount = buf.len().min(self.room);
            self.room -= wcount;
            self.content.extend_from_slice(&buf[..wcount]);
            Poll::Ready(Ok(wcount))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[async_trait]
    impl Truncate for FullDisk {
        async fn len(&mut self) -> io::Result<u64> {
            Ok(self.content.len() as u64)
        }

        async fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.content.truncate(len as usize);
            Ok(())
        }
    }

    fn bet(agency: u8, first_name: &str, number: u16) -> Bet {
        Bet {
            agency,
            first_name: first_name.into(),
            last_name: "Diaz".into(),
            document: format!("{}{}", agency, number),
            birthdate: "2001-01-31".parse().unwrap(),
            number,
        }
    }

    #[tokio::test]
    async fn scan_observes_appends() {
        let file = TempFile::new().await.unwrap();
        let store = BetStore::open(file.file_path()).await.unwrap();

        assert!(store.scan().await.unwrap().collect().await.unwrap().is_empty());

        let first = vec![bet(1, "Ana", 1), bet(1, "Luz, Maria", 2)];
        let second = vec![bet(2, "Said \"Tito\"", 7574)];
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        let stored = store.scan().await.unwrap().collect().await.unwrap();
        assert_eq!(stored, [first, second].concat());
    }

    #[tokio::test]
    async fn scans_are_repeatable() {
        let file = TempFile::new().await.unwrap();
        let store = BetStore::open(file.file_path()).await.unwrap();
        store
            .append(&[bet(1, "Multi\nLine", 5), bet(3, "Ana", 6)])
            .await
            .unwrap();

        let first = store.scan().await.unwrap().collect().await.unwrap();
        let second = store.scan().await.unwrap().collect().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let file = TempFile::new().await.unwrap();
        let store = BetStore::open(file.file_path()).await.unwrap();

        let mut handles = vec![];
        for agency in 1..=8u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let batch: Vec<Bet> = (0..200).map(|idx| bet(agency, "Ana", idx)).collect();
                store.append(&batch).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.scan().await.unwrap().collect().await.unwrap();
        assert_eq!(stored.len(), 8 * 200);

        // every batch shows up as one contiguous run, in its original order
        for run in stored.chunks(200) {
            let agency = run[0].agency;
            for (idx, bet) in run.iter().enumerate() {
                assert_eq!(bet.agency, agency);
                assert_eq!(bet.number as usize, idx);
            }
        }
    }

    #[tokio::test]
    async fn scan_holds_the_store_lock() {
        let file = TempFile::new().await.unwrap();
        let store = BetStore::open(file.file_path()).await.unwrap();
        store.append(&[bet(1, "Ana", 1)]).await.unwrap();

        let mut scan = store.scan().await.unwrap();
        assert!(scan.next_bet().await.is_some());

        let writer = store.clone();
        let pending = tokio::spawn(async move { writer.append(&[bet(2, "Eva", 2)]).await });

        // the append can't go through while the scan is alive
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert!(scan.next_bet().await.is_none());

        drop(scan);
        pending.await.unwrap().unwrap();
        assert_eq!(store.scan().await.unwrap().collect().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_storage_is_unavailable() {
        let file = TempFile::new().await.unwrap();
        let store = BetStore::open(file.file_path().with_extension("removed"))
            .await
            .unwrap();
        tokio::fs::remove_file(store.path()).await.unwrap();

        assert!(matches!(
            store.append(&[bet(1, "Ana", 1)]).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(store.scan().await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn corrupted_records_are_reported() {
        let file = TempFile::new().await.unwrap();
        let store = BetStore::open(file.file_path()).await.unwrap();
        tokio::fs::write(store.path(), "1,Ana,Diaz,15,2001-01-31,15\nnot a record\n")
            .await
            .unwrap();

        let mut scan = store.scan().await.unwrap();
        assert!(scan.next_bet().await.unwrap().is_ok());
        assert!(matches!(
            scan.next_bet().await,
            Some(Err(StoreError::Corrupted { line: 2, .. }))
        ));
        assert!(scan.next_bet().await.is_none());
    }

    #[tokio::test]
    async fn failed_appends_leave_no_partial_batch() {
        let mut disk = FullDisk {
            content: b"1,Ana,Diaz,11,2001-01-31,1\n".to_vec(),
            room: 10,
        };

        let records = b"2,Eva,Diaz,22,2001-01-31,2\n2,Luz,Diaz,23,2001-01-31,3\n";
        assert!(append_all(&mut disk, records).await.is_err());
        assert_eq!(disk.content, b"1,Ana,Diaz,11,2001-01-31,1\n");

        disk.room = records.len();
        append_all(&mut disk, records).await.unwrap();
        assert_eq!(disk.content, [&b"1,Ana,Diaz,11,2001-01-31,1\n"[..], &records[..]].concat());
    }
}
