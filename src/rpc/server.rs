//! Binds a local RPC server: an accept loop that wraps every inbound
//! connection as a `Link` sharing one `Router`.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::{Link, Router};

pub struct Server {
    pub address: SocketAddr,
    pub accept_task: JoinHandle<()>,
}

impl Server {
    /// Binds to an ephemeral local port and starts accepting connections in
    /// the background, dispatching through `router`.
    pub async fn bind(router: Router) -> anyhow::Result<Server> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let address = listener.local_addr()?;
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let _link = Link::new(stream, router.clone());
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                        break;
                    }
                }
            }
        });
        Ok(Server {
            address,
            accept_task,
        })
    }

    pub fn address_string(&self) -> String {
        self.address.to_string()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
