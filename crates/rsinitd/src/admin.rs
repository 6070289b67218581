//! Admin-command execution against individual mongod members.
//!
//! [`AdminRunner`] is the seam the bootstrap logic is written against;
//! [`MongoAdmin`] is the driver-backed implementation. Each call builds a
//! short-lived client: the bootstrapper runs a handful of commands and
//! exits, so connection pooling buys nothing.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::Document;
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, Credential, Tls, TlsOptions};
use mongodb::Client;
use tracing::debug;

use crate::error::{InitError, InitResult};

/// Server-selection bound for one admin connection.
const SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how to connect for one admin command.
#[derive(Debug, Clone)]
pub struct AdminTarget {
    /// `host:port` of the member (or seed) to contact.
    pub address: String,
    /// Username/password, absent while the localhost exception applies.
    pub credentials: Option<(String, String)>,
    /// Discover and address the primary of this set instead of the member
    /// itself.
    pub repl_set_name: Option<String>,
    /// Connect to exactly the addressed member.
    pub direct: bool,
    /// Tolerate a certificate that does not cover the addressed name;
    /// needed when talking to `localhost`.
    pub allow_invalid_hostnames: bool,
}

impl AdminTarget {
    /// Unauthenticated direct probe of one member.
    pub fn probe(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: None,
            repl_set_name: None,
            direct: true,
            allow_invalid_hostnames: false,
        }
    }

    /// Direct localhost connection, certificate name checking disabled.
    pub fn localhost(port: u16, credentials: Option<(String, String)>) -> Self {
        Self {
            address: format!("localhost:{port}"),
            credentials,
            repl_set_name: None,
            direct: true,
            allow_invalid_hostnames: true,
        }
    }

    /// Authenticated connection routed to the primary of `set_name`.
    pub fn primary(
        seed: impl Into<String>,
        set_name: impl Into<String>,
        credentials: (String, String),
    ) -> Self {
        Self {
            address: seed.into(),
            credentials: Some(credentials),
            repl_set_name: Some(set_name.into()),
            direct: false,
            allow_invalid_hostnames: false,
        }
    }
}

/// Executes one admin command against a target.
#[async_trait]
pub trait AdminRunner: Send + Sync {
    async fn run(&self, target: &AdminTarget, command: Document) -> InitResult<Document>;
}

/// Driver-backed runner. `ca_file` enables TLS against the member
/// certificates.
pub struct MongoAdmin {
    ca_file: Option<PathBuf>,
}

impl MongoAdmin {
    pub fn new(ca_file: Option<PathBuf>) -> Self {
        Self { ca_file }
    }

    async fn client(&self, target: &AdminTarget, operation: &str) -> InitResult<Client> {
        let uri = format!("mongodb://{}/", target.address);
        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| InitError::admin(operation, e.to_string()))?;

        options.server_selection_timeout = Some(SELECTION_TIMEOUT);
        options.direct_connection = Some(target.direct);
        options.repl_set_name = target.repl_set_name.clone();

        if let Some((username, password)) = &target.credentials {
            options.credential = Some(
                Credential::builder()
                    .username(username.clone())
                    .password(password.clone())
                    .build(),
            );
        }

        if let Some(ca) = &self.ca_file {
            options.tls = Some(Tls::Enabled(
                TlsOptions::builder()
                    .ca_file_path(ca.clone())
                    .allow_invalid_hostnames(target.allow_invalid_hostnames)
                    .build(),
            ));
        }

        Client::with_options(options).map_err(|e| InitError::admin(operation, e.to_string()))
    }
}

#[async_trait]
impl AdminRunner for MongoAdmin {
    async fn run(&self, target: &AdminTarget, command: Document) -> InitResult<Document> {
        let operation = command
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| "admin command".to_string());
        debug!(address = %target.address, %operation, "running admin command");

        let client = self.client(target, &operation).await?;
        client
            .database("admin")
            .run_command(command, None)
            .await
            .map_err(|e| match *e.kind {
                ErrorKind::Command(ref c) => {
                    InitError::command_failed(&operation, c.code, c.message.clone())
                }
                ref other => InitError::admin(&operation, other.to_string()),
            })
    }
}
