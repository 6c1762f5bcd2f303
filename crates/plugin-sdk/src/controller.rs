use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::proto::plugin::grpc_controller_server::GrpcController;
use crate::proto::plugin::Empty;

/// Lets the host ask the plugin to exit once it is done with it
pub(crate) struct Controller {
    shutdown: CancellationToken,
}

impl Controller {
    pub(crate) fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

#[tonic::async_trait]
impl GrpcController for Controller {
    async fn shutdown(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        info!("received shutdown request from host");
        self.shutdown.cancel();
        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_cancels_the_server() {
        let token = CancellationToken::new();
        let controller = Controller::new(token.clone());
        controller
            .shutdown(Request::new(Empty {}))
            .await
            .expect("shutdown should always succeed");
        assert!(token.is_cancelled());
    }
}
