// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin control-socket client: connects, sends one command, waits for the
//! terminal reply.

use std::path::Path;

use desd_wire::ClientEndpoint;
use tokio::net::UnixStream;

use crate::error::{reply_to_result, CliError};

pub struct DesdClient {
    endpoint: std::sync::Arc<ClientEndpoint<UnixStream>>,
}

impl DesdClient {
    pub async fn connect(socket: &Path) -> Result<Self, CliError> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|e| CliError::Connect(socket.to_path_buf(), e))?;
        Ok(Self { endpoint: ClientEndpoint::new(stream) })
    }

    async fn call(&self, fields: Vec<String>) -> Result<Vec<String>, CliError> {
        let reply = self.endpoint.send_msg(fields).await?;
        reply_to_result(reply)
    }

    pub async fn echo(&self, args: Vec<String>) -> Result<Vec<String>, CliError> {
        let mut fields = vec!["echo".to_string()];
        fields.extend(args);
        self.call(fields).await
    }

    pub async fn service_action(&self, service: &str, action: &str) -> Result<Vec<String>, CliError> {
        self.call(vec!["service_action".to_string(), service.to_string(), action.to_string()]).await
    }

    pub async fn killscript(&self, service: &str, script: &str) -> Result<Vec<String>, CliError> {
        self.call(vec!["killscript".to_string(), service.to_string(), script.to_string()]).await
    }
}
