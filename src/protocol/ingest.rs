//! # Database Ingest
//!
//! Streams a new database's raw content from the client to the backend's
//! builder. The request carries the target name as a NulString followed by
//! escaped document bytes; the reply is a message plus status. A failed
//! build never terminates the session.

use crate::backend::{Backend, LogOutcome, SessionLabel, SessionLog};
use crate::config::LimitConfig;
use crate::core::wire;
use crate::error::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Frame-size bound for database names.
const MAX_NAME_LEN: usize = 256;

/// Handles one ingest request on behalf of a session.
pub struct DatabaseIngestHandler<'a, B: Backend> {
    backend: &'a B,
    limits: &'a LimitConfig,
}

impl<'a, B: Backend> DatabaseIngestHandler<'a, B> {
    pub fn new(backend: &'a B, limits: &'a LimitConfig) -> Self {
        Self { backend, limits }
    }

    /// Read the target name and document content, run the builder, and send
    /// the reply frame. Build failures are reported to the client and
    /// logged; only transport failures propagate.
    pub async fn handle<R, W>(
        &self,
        ctx: &mut B::Context,
        reader: &mut R,
        writer: &mut W,
        log: &dyn SessionLog,
        label: &SessionLabel,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let name = wire::read_nul_string(reader, MAX_NAME_LEN).await?;
        let content =
            wire::read_escaped_content(reader, self.limits.max_document_size).await?;

        match self.backend.build_database(&name, &content, ctx).await {
            Ok(info) => {
                log.event(label, &format!("CREATE {name}"), LogOutcome::Ok);
                wire::write_nul_string(writer, &info).await?;
                wire::write_status(writer, true).await?;
            }
            Err(err) => {
                let msg = err.client_message();
                log.event(label, &format!("CREATE {name}"), LogOutcome::Failed(&msg));
                wire::write_nul_string(writer, &msg).await?;
                wire::write_status(writer, false).await?;
            }
        }
        writer.flush().await?;
        Ok(())
    }
}
