//! Remote Resource Client.
//!
//! The engine does not talk HTTP itself. The host supplies an implementation
//! of these traits (typically a thin wrapper around the vendor's API client)
//! that maps responses into the typed records and classifies failures into
//! [`ClientError`]s.

use async_trait::async_trait;

use crate::error::ClientError;
use crate::model::{
    CreateIp, CreateProject, CreateServer, CreateSshKey, IpRecord, ProjectRecord,
    ReinstallServer, ServerRecord, SshKeyRecord, UpdateIp, UpdateProject, UpdateServer,
    UpdateSshKey,
};

pub type ClientResult<T> = Result<T, ClientError>;

// =============================================================================
// Per-kind API traits
// =============================================================================

#[async_trait]
pub trait ProjectApi: Send + Sync {
    async fn create_project(&self, req: CreateProject) -> ClientResult<ProjectRecord>;

    async fn get_project(&self, id: &str) -> ClientResult<ProjectRecord>;

    async fn update_project(&self, id: &str, req: UpdateProject) -> ClientResult<ProjectRecord>;

    async fn delete_project(&self, id: &str) -> ClientResult<()>;
}

#[async_trait]
pub trait SshKeyApi: Send + Sync {
    async fn create_ssh_key(&self, req: CreateSshKey) -> ClientResult<SshKeyRecord>;

    async fn get_ssh_key(&self, id: &str) -> ClientResult<SshKeyRecord>;

    async fn update_ssh_key(&self, id: &str, req: UpdateSshKey) -> ClientResult<SshKeyRecord>;

    async fn delete_ssh_key(&self, id: &str) -> ClientResult<()>;
}

/// Elastic IP operations.
#[async_trait]
pub trait IpApi: Send + Sync {
    async fn create_ip(&self, req: CreateIp) -> ClientResult<IpRecord>;

    async fn get_ip(&self, id: &str) -> ClientResult<IpRecord>;

    /// Update assignment, DNS records and tags.
    async fn update_ip(&self, id: &str, req: UpdateIp) -> ClientResult<IpRecord>;

    /// Detach the address from whatever server or IP it points at.
    async fn unassign_ip(&self, id: &str) -> ClientResult<()>;

    /// Release the address. Fails while it is still assigned.
    async fn delete_ip(&self, id: &str) -> ClientResult<()>;
}

/// Server operations.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Order a server. Returns as soon as the order is accepted; the server
    /// is provisioned asynchronously.
    async fn create_server(&self, req: CreateServer) -> ClientResult<ServerRecord>;

    /// Read a server. `fields` restricts the response to the named fields,
    /// which keeps status polling cheap.
    async fn get_server(&self, id: &str, fields: Option<&[&str]>) -> ClientResult<ServerRecord>;

    async fn update_server(&self, id: &str, req: UpdateServer) -> ClientResult<ServerRecord>;

    /// Start an OS reinstall. Progress is reported on `deployment`.
    async fn reinstall_server(&self, id: &str, req: ReinstallServer) -> ClientResult<()>;

    async fn delete_server(&self, id: &str) -> ClientResult<()>;
}

// =============================================================================
// Composite client
// =============================================================================

/// Everything the engine needs from the remote API.
///
/// Implemented automatically for any type implementing all per-kind traits.
pub trait RemoteClient: ProjectApi + SshKeyApi + IpApi + ServerApi + Send + Sync {}

impl<T> RemoteClient for T where T: ProjectApi + SshKeyApi + IpApi + ServerApi + Send + Sync {}
