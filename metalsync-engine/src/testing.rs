//! In-memory fake of the remote bare-metal API for tests.
//!
//! Behaves like the real service where the engine cares: servers go through
//! a scripted sequence of provisioning statuses, reinstalls through a
//! scripted sequence of deployment states, assigned IPs refuse to be
//! released, and missing objects answer with not-found. Every call is logged
//! and failures can be injected per operation.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::client::{ClientResult, IpApi, ProjectApi, ServerApi, SshKeyApi};
use crate::error::ClientError;
use crate::model::server::ServerIp;
use crate::model::{
    AssignIp, CreateIp, CreateProject, CreateServer, CreateSshKey, IpRecord, ProjectRecord,
    ReinstallServer, ServerRecord, SshKeyRecord, UpdateIp, UpdateProject, UpdateServer,
    UpdateSshKey,
};

/// Remote operations, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateProject,
    GetProject,
    UpdateProject,
    DeleteProject,
    CreateSshKey,
    GetSshKey,
    UpdateSshKey,
    DeleteSshKey,
    CreateIp,
    GetIp,
    UpdateIp,
    UnassignIp,
    DeleteIp,
    CreateServer,
    /// Full server read.
    GetServer,
    /// Server read with a field filter, i.e. one poll round.
    PollServer,
    UpdateServer,
    ReinstallServer,
    DeleteServer,
}

impl Op {
    /// Whether the operation changes remote state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Op::GetProject | Op::GetSshKey | Op::GetIp | Op::GetServer | Op::PollServer
        )
    }
}

/// One logged call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub id: Option<String>,
}

struct FakeServer {
    record: ServerRecord,
    status_script: VecDeque<String>,
    deploy_script: VecDeque<String>,
    password: Option<String>,
}

struct State {
    projects: HashMap<String, ProjectRecord>,
    ssh_keys: HashMap<String, SshKeyRecord>,
    ips: HashMap<String, IpRecord>,
    servers: HashMap<String, FakeServer>,
    calls: Vec<Call>,
    failures: HashMap<Op, VecDeque<ClientError>>,
    status_script: Vec<String>,
    deploy_script: Vec<String>,
    server_addresses: VecDeque<String>,
    assign_server_ips: bool,
    next_host: u8,
}

impl Default for State {
    fn default() -> Self {
        Self {
            projects: HashMap::new(),
            ssh_keys: HashMap::new(),
            ips: HashMap::new(),
            servers: HashMap::new(),
            calls: Vec::new(),
            failures: HashMap::new(),
            status_script: vec!["active".to_string()],
            deploy_script: vec!["deploying".to_string(), "deployed".to_string()],
            server_addresses: VecDeque::new(),
            assign_server_ips: true,
            next_host: 10,
        }
    }
}

impl State {
    fn begin(&mut self, op: Op, id: Option<&str>) -> ClientResult<()> {
        self.calls.push(Call {
            op,
            id: id.map(String::from),
        });
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_address(&mut self) -> String {
        if let Some(address) = self.server_addresses.pop_front() {
            return address;
        }
        let host = self.next_host;
        self.next_host = self.next_host.wrapping_add(1);
        format!("198.51.100.{}", host)
    }
}

/// In-memory [`RemoteClient`](crate::client::RemoteClient).
pub struct FakeCloud {
    state: Mutex<State>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Statuses reported by successive poll reads of every server created
    /// from now on. The last one sticks.
    pub fn set_status_script(&self, script: &[&str]) {
        self.lock().status_script = script.iter().map(|s| s.to_string()).collect();
    }

    /// Statuses reported by successive poll reads of one existing server.
    pub fn script_server(&self, id: &str, script: &[&str]) {
        if let Some(server) = self.lock().servers.get_mut(id) {
            server.status_script = script.iter().map(|s| s.to_string()).collect();
        }
    }

    /// Deployment states reported by successive polls after a reinstall.
    pub fn set_deploy_script(&self, script: &[&str]) {
        self.lock().deploy_script = script.iter().map(|s| s.to_string()).collect();
    }

    /// Primary address of the next server created.
    pub fn push_server_address(&self, address: &str) {
        self.lock().server_addresses.push_back(address.to_string());
    }

    /// Whether new servers get a primary address at all.
    pub fn set_assign_server_ips(&self, assign: bool) {
        self.lock().assign_server_ips = assign;
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: Op, error: ClientError, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|call| call.op == op).count()
    }

    pub fn mutations(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op.is_mutation())
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn project(&self, id: &str) -> Option<ProjectRecord> {
        self.lock().projects.get(id).cloned()
    }

    pub fn ssh_key(&self, id: &str) -> Option<SshKeyRecord> {
        self.lock().ssh_keys.get(id).cloned()
    }

    pub fn ip(&self, id: &str) -> Option<IpRecord> {
        self.lock().ips.get(id).cloned()
    }

    pub fn server(&self, id: &str) -> Option<ServerRecord> {
        self.lock().servers.get(id).map(|s| s.record.clone())
    }

    pub fn server_count(&self) -> usize {
        self.lock().servers.len()
    }

    /// Root password sent with the last reinstall of `id`.
    pub fn server_password(&self, id: &str) -> Option<String> {
        self.lock().servers.get(id).and_then(|s| s.password.clone())
    }

    /// Change a project behind the engine's back.
    pub fn edit_project(&self, id: &str, edit: impl FnOnce(&mut ProjectRecord)) {
        if let Some(record) = self.lock().projects.get_mut(id) {
            edit(record);
        }
    }

    pub fn edit_ssh_key(&self, id: &str, edit: impl FnOnce(&mut SshKeyRecord)) {
        if let Some(record) = self.lock().ssh_keys.get_mut(id) {
            edit(record);
        }
    }

    pub fn edit_ip(&self, id: &str, edit: impl FnOnce(&mut IpRecord)) {
        if let Some(record) = self.lock().ips.get_mut(id) {
            edit(record);
        }
    }

    pub fn edit_server(&self, id: &str, edit: impl FnOnce(&mut ServerRecord)) {
        if let Some(server) = self.lock().servers.get_mut(id) {
            edit(&mut server.record);
            server.status_script = VecDeque::from([server.record.status.clone()]);
        }
    }

    /// Delete a server out-of-band.
    pub fn remove_server(&self, id: &str) {
        self.lock().servers.remove(id);
    }

    pub fn remove_ip(&self, id: &str) {
        self.lock().ips.remove(id);
    }
}

fn not_found(kind: &str, id: &str) -> ClientError {
    ClientError::not_found(format!("{} {}", kind, id))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn fingerprint(public_key: &str) -> String {
    let mut hasher = DefaultHasher::new();
    public_key.trim().hash(&mut hasher);
    format!("SHA256:{:016x}", hasher.finish())
}

/// Pop the next scripted value; the last one sticks.
fn advance(script: &mut VecDeque<String>) -> Option<String> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

#[async_trait]
impl ProjectApi for FakeCloud {
    async fn create_project(&self, req: CreateProject) -> ClientResult<ProjectRecord> {
        let mut state = self.lock();
        state.begin(Op::CreateProject, None)?;
        let record = ProjectRecord {
            id: new_id(),
            name: req.name,
            team_id: req.team_id,
            bgp_enabled: req.bgp_enabled,
            bgp_local_asn: req.bgp_enabled.then_some(65000),
        };
        state.projects.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_project(&self, id: &str) -> ClientResult<ProjectRecord> {
        let mut state = self.lock();
        state.begin(Op::GetProject, Some(id))?;
        state
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("project", id))
    }

    async fn update_project(&self, id: &str, req: UpdateProject) -> ClientResult<ProjectRecord> {
        let mut state = self.lock();
        state.begin(Op::UpdateProject, Some(id))?;
        let record = state
            .projects
            .get_mut(id)
            .ok_or_else(|| not_found("project", id))?;
        if let Some(name) = req.name {
            record.name = name;
        }
        if let Some(bgp_enabled) = req.bgp_enabled {
            record.bgp_enabled = bgp_enabled;
            if bgp_enabled && record.bgp_local_asn.is_none() {
                record.bgp_local_asn = Some(65000);
            }
        }
        Ok(record.clone())
    }

    async fn delete_project(&self, id: &str) -> ClientResult<()> {
        let mut state = self.lock();
        state.begin(Op::DeleteProject, Some(id))?;
        state
            .projects
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("project", id))
    }
}

#[async_trait]
impl SshKeyApi for FakeCloud {
    async fn create_ssh_key(&self, req: CreateSshKey) -> ClientResult<SshKeyRecord> {
        let mut state = self.lock();
        state.begin(Op::CreateSshKey, None)?;
        if !req.public_key.starts_with("ssh-") && !req.public_key.starts_with("ecdsa-") {
            return Err(ClientError::permanent(422, "key is not a valid public key"));
        }
        let record = SshKeyRecord {
            id: new_id(),
            label: req.label,
            fingerprint: fingerprint(&req.public_key),
            public_key: req.public_key,
        };
        state.ssh_keys.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_ssh_key(&self, id: &str) -> ClientResult<SshKeyRecord> {
        let mut state = self.lock();
        state.begin(Op::GetSshKey, Some(id))?;
        state
            .ssh_keys
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("ssh key", id))
    }

    async fn update_ssh_key(&self, id: &str, req: UpdateSshKey) -> ClientResult<SshKeyRecord> {
        let mut state = self.lock();
        state.begin(Op::UpdateSshKey, Some(id))?;
        let record = state
            .ssh_keys
            .get_mut(id)
            .ok_or_else(|| not_found("ssh key", id))?;
        record.label = req.label;
        Ok(record.clone())
    }

    async fn delete_ssh_key(&self, id: &str) -> ClientResult<()> {
        let mut state = self.lock();
        state.begin(Op::DeleteSshKey, Some(id))?;
        state
            .ssh_keys
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("ssh key", id))
    }
}

#[async_trait]
impl IpApi for FakeCloud {
    async fn create_ip(&self, req: CreateIp) -> ClientResult<IpRecord> {
        let mut state = self.lock();
        state.begin(Op::CreateIp, None)?;
        if let Some(server) = &req.target_server_id
            && !state.servers.contains_key(server)
        {
            return Err(ClientError::permanent(422, format!("server {} does not exist", server)));
        }
        let address = state.next_address();
        let record = IpRecord {
            id: new_id(),
            ptr_record: req
                .ptr_record
                .or_else(|| Some(format!("{}.static.example.net", address.replace('.', "-")))),
            address,
            project_id: req.project_id,
            region: req.region,
            ddos_scrubbing: req.ddos_scrubbing,
            assigned_to: req.target_server_id,
            routed_to: req.route_ip_id,
            a_record: req.a_record,
            tags: req.tags,
        };
        state.ips.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_ip(&self, id: &str) -> ClientResult<IpRecord> {
        let mut state = self.lock();
        state.begin(Op::GetIp, Some(id))?;
        state
            .ips
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("ip address", id))
    }

    async fn update_ip(&self, id: &str, req: UpdateIp) -> ClientResult<IpRecord> {
        let mut state = self.lock();
        state.begin(Op::UpdateIp, Some(id))?;
        let record = state
            .ips
            .get_mut(id)
            .ok_or_else(|| not_found("ip address", id))?;
        match req.assignment {
            Some(AssignIp::ToServer(server)) => {
                record.assigned_to = Some(server);
                record.routed_to = None;
            }
            Some(AssignIp::ToRoute(route)) => {
                record.assigned_to = None;
                record.routed_to = Some(route);
            }
            Some(AssignIp::Release) => {
                record.assigned_to = None;
                record.routed_to = None;
            }
            None => {}
        }
        if let Some(ptr_record) = req.ptr_record {
            record.ptr_record = Some(ptr_record);
        }
        if let Some(a_record) = req.a_record {
            record.a_record = Some(a_record);
        }
        if let Some(tags) = req.tags {
            record.tags = tags;
        }
        Ok(record.clone())
    }

    async fn unassign_ip(&self, id: &str) -> ClientResult<()> {
        let mut state = self.lock();
        state.begin(Op::UnassignIp, Some(id))?;
        let record = state
            .ips
            .get_mut(id)
            .ok_or_else(|| not_found("ip address", id))?;
        record.assigned_to = None;
        record.routed_to = None;
        Ok(())
    }

    async fn delete_ip(&self, id: &str) -> ClientResult<()> {
        let mut state = self.lock();
        state.begin(Op::DeleteIp, Some(id))?;
        let record = state.ips.get(id).ok_or_else(|| not_found("ip address", id))?;
        if record.is_assigned() {
            return Err(ClientError::permanent(
                409,
                "ip address is still assigned and cannot be released",
            ));
        }
        state.ips.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ServerApi for FakeCloud {
    async fn create_server(&self, req: CreateServer) -> ClientResult<ServerRecord> {
        let mut state = self.lock();
        state.begin(Op::CreateServer, None)?;

        let id = new_id();
        let mut ip_addresses = Vec::new();
        if state.assign_server_ips {
            ip_addresses.push(ServerIp {
                id: new_id(),
                address: state.next_address(),
            });
        }
        for extra in &req.ip_addresses {
            if let Some(ip) = state.ips.get_mut(extra) {
                ip.assigned_to = Some(id.clone());
                ip_addresses.push(ServerIp {
                    id: ip.id.clone(),
                    address: ip.address.clone(),
                });
            }
        }

        let record = ServerRecord {
            id: id.clone(),
            status: "pending".to_string(),
            deployment: Some("deploying".to_string()),
            hostname: req.hostname,
            project_id: req.project_id,
            region: req.region,
            plan: req.plan,
            spot_instance: req.spot_instance,
            image: req.image,
            ssh_key_ids: req.ssh_key_ids,
            ip_addresses,
            bgp_enabled: req.bgp_enabled,
            tags: req.tags,
            created_at: Some(Utc::now()),
        };
        let server = FakeServer {
            record: record.clone(),
            status_script: state.status_script.iter().cloned().collect(),
            deploy_script: VecDeque::new(),
            password: None,
        };
        state.servers.insert(id, server);
        Ok(record)
    }

    async fn get_server(&self, id: &str, fields: Option<&[&str]>) -> ClientResult<ServerRecord> {
        let mut state = self.lock();
        let op = if fields.is_some() {
            Op::PollServer
        } else {
            Op::GetServer
        };
        state.begin(op, Some(id))?;
        let server = state
            .servers
            .get_mut(id)
            .ok_or_else(|| not_found("server", id))?;

        let Some(fields) = fields else {
            return Ok(server.record.clone());
        };

        if fields.contains(&"status")
            && let Some(status) = advance(&mut server.status_script)
        {
            server.record.status = status;
            if server.record.status == "active" {
                server.record.deployment = Some("deployed".to_string());
            }
        }
        if fields.contains(&"deployment")
            && let Some(deployment) = advance(&mut server.deploy_script)
        {
            server.record.deployment = Some(deployment);
        }

        Ok(ServerRecord {
            id: server.record.id.clone(),
            status: server.record.status.clone(),
            deployment: server.record.deployment.clone(),
            hostname: None,
            project_id: String::new(),
            region: String::new(),
            plan: String::new(),
            spot_instance: false,
            image: None,
            ssh_key_ids: Vec::new(),
            ip_addresses: Vec::new(),
            bgp_enabled: false,
            tags: Default::default(),
            created_at: None,
        })
    }

    async fn update_server(&self, id: &str, req: UpdateServer) -> ClientResult<ServerRecord> {
        let mut state = self.lock();
        state.begin(Op::UpdateServer, Some(id))?;
        let server = state
            .servers
            .get_mut(id)
            .ok_or_else(|| not_found("server", id))?;
        if let Some(hostname) = req.hostname {
            server.record.hostname = Some(hostname);
        }
        if let Some(bgp_enabled) = req.bgp_enabled {
            server.record.bgp_enabled = bgp_enabled;
        }
        if let Some(tags) = req.tags {
            server.record.tags = tags;
        }
        Ok(server.record.clone())
    }

    async fn reinstall_server(&self, id: &str, req: ReinstallServer) -> ClientResult<()> {
        let mut state = self.lock();
        state.begin(Op::ReinstallServer, Some(id))?;
        let deploy_script: VecDeque<String> = state.deploy_script.iter().cloned().collect();
        let server = state
            .servers
            .get_mut(id)
            .ok_or_else(|| not_found("server", id))?;
        if server.record.status != "active" {
            return Err(ClientError::permanent(
                409,
                format!("server is {}, reinstall needs an active server", server.record.status),
            ));
        }
        server.record.image = req.image;
        if req.hostname.is_some() {
            server.record.hostname = req.hostname;
        }
        server.record.ssh_key_ids = req.ssh_key_ids;
        server.record.deployment = Some("reinstall_requested".to_string());
        server.deploy_script = deploy_script;
        server.password = Some(req.password);
        Ok(())
    }

    async fn delete_server(&self, id: &str) -> ClientResult<()> {
        let mut state = self.lock();
        state.begin(Op::DeleteServer, Some(id))?;
        state
            .servers
            .remove(id)
            .ok_or_else(|| not_found("server", id))?;
        for ip in state.ips.values_mut() {
            if ip.assigned_to.as_deref() == Some(id) {
                ip.assigned_to = None;
            }
        }
        Ok(())
    }
}
