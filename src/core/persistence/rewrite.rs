// src/core/persistence/rewrite.rs

//! AOF rewrite: replaces the ever-growing command log with a compact
//! reconstruction of the current state.
//!
//! The protocol pins the live file's size S, replays the first S bytes into
//! a scratch engine, emits reconstruction commands for every key, then
//! splices in the records that accumulated past S while the rewrite ran, and
//! atomically renames the result over the live file.

use super::aof::{AofHandler, load_aof};
use super::marshal;
use crate::core::database::MultiDb;
use crate::core::{OpalDBError, RespFrame, cmd_line};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::info;

struct RewriteContext {
    temp_path: String,
    /// Size of the live AOF when the rewrite began; everything past this
    /// offset is appended to the rewritten file afterwards.
    file_size: u64,
    /// The writer's database index at rewrite start, re-asserted before the
    /// spliced tail so its records keep their meaning.
    db_index: usize,
}

impl AofHandler {
    /// Runs a full rewrite against the live engine. Only one rewrite runs at
    /// a time; concurrent requests queue on the rewrite lock.
    pub async fn rewrite(&self, live: &Arc<MultiDb>) -> Result<(), OpalDBError> {
        let _serialized = self.rewrite_lock.lock().await;
        let ctx = self.start_rewrite().await?;
        self.do_rewrite(&ctx, live).await?;
        self.finish_rewrite(ctx).await
    }

    async fn start_rewrite(&self) -> Result<RewriteContext, OpalDBError> {
        let state = self.state.lock().await;
        state.file.sync_all().await?;
        let file_size = tokio::fs::metadata(self.path()).await?.len();
        let temp_path = format!("{}.rewrite.{}", self.path(), std::process::id());
        // Truncate any leftover from an interrupted earlier attempt.
        File::create(&temp_path).await?;
        Ok(RewriteContext {
            temp_path,
            file_size,
            db_index: state.current_index,
        })
    }

    async fn do_rewrite(
        &self,
        ctx: &RewriteContext,
        live: &Arc<MultiDb>,
    ) -> Result<(), OpalDBError> {
        // Reconstruct the state as of the pinned offset in a scratch engine.
        let scratch = MultiDb::new_basic(live.config().clone());
        load_aof(self.path(), &scratch, ctx.file_size).await;

        let mut buffer = Vec::new();
        for index in 0..scratch.database_count() {
            let select = cmd_line(&["SELECT", &index.to_string()]);
            buffer.extend_from_slice(&RespFrame::from_cmd_line(&select).encode_to_vec());
            let db = scratch.db_at_arc(index)?;
            db.for_each_entry(|key, value, expiry| {
                if let Some(rebuild) = marshal::entry_to_cmd_line(key, value) {
                    buffer.extend_from_slice(&RespFrame::from_cmd_line(&rebuild).encode_to_vec());
                }
                if let Some(at) = expiry {
                    let expire = marshal::pexpire_at_cmd(key, at);
                    buffer.extend_from_slice(&RespFrame::from_cmd_line(&expire).encode_to_vec());
                }
                true
            });
        }
        scratch.abort_timers();

        let mut temp = OpenOptions::new()
            .append(true)
            .open(&ctx.temp_path)
            .await?;
        temp.write_all(&buffer).await?;
        temp.sync_all().await?;
        Ok(())
    }

    async fn finish_rewrite(&self, ctx: RewriteContext) -> Result<(), OpalDBError> {
        let mut state = self.state.lock().await;

        let mut temp = OpenOptions::new()
            .append(true)
            .open(&ctx.temp_path)
            .await?;
        // Records past the pinned offset belong to the database the writer
        // had selected when the rewrite began.
        let select = cmd_line(&["SELECT", &ctx.db_index.to_string()]);
        temp.write_all(&RespFrame::from_cmd_line(&select).encode_to_vec())
            .await?;

        let mut live_tail = File::open(self.path()).await?;
        live_tail.seek(SeekFrom::Start(ctx.file_size)).await?;
        tokio::io::copy(&mut live_tail, &mut temp).await?;
        temp.sync_all().await?;

        tokio::fs::rename(&ctx.temp_path, self.path()).await?;

        let mut file = OpenOptions::new().append(true).open(self.path()).await?;
        // Re-assert the writer's current index so the next appended record
        // lands in the right database.
        let select = cmd_line(&["SELECT", &state.current_index.to_string()]);
        file.write_all(&RespFrame::from_cmd_line(&select).encode_to_vec())
            .await?;
        state.file = file;
        info!("AOF rewrite finished, log compacted to reconstruction commands");
        Ok(())
    }
}
