//! Drive a bridged connection over an in-memory stream.

use std::io;

use mudbridge::{
    config::BridgeConfig,
    connection::{MudContext, serve},
    dispatch::Dispatcher,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio_util::sync::CancellationToken;

/// Duplex buffer size used by [`drive_mud`].
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Serve `dispatcher` on one end of a duplex stream, write each chunk to the
/// other end, close it, and return every line the bridge sent back.
///
/// # Errors
///
/// Returns an I/O error if the stream fails or the bridge reports an error.
pub async fn drive_mud<P>(
    dispatcher: Dispatcher<MudContext<P>>,
    config: &BridgeConfig,
    chunks: Vec<String>,
) -> io::Result<Vec<String>> {
    let (mut client, server) = duplex(DEFAULT_CAPACITY);

    let server_fut = async {
        serve(server, dispatcher, config, CancellationToken::new())
            .await
            .map_err(io::Error::other)
    };

    let client_fut = async {
        for chunk in &chunks {
            client.write_all(chunk.as_bytes()).await?;
            tokio::task::yield_now().await;
        }
        client.shutdown().await?;

        let mut text = String::new();
        client.read_to_string(&mut text).await?;
        io::Result::Ok(text)
    };

    let ((), text) = tokio::try_join!(server_fut, client_fut)?;
    Ok(text.lines().map(str::to_owned).collect())
}
