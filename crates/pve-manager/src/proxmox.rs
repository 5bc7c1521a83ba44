use std::collections::BTreeMap;

use reqwest::header::{ACCEPT, AUTHORIZATION, COOKIE, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::{Auth, PveConfig};
use crate::error::{PveError, Result};
use crate::traits::VmApi;
use crate::types::{CreateVm, TaskId, VmConfig, VmId, VmStatus};

const CSRF_HEADER: &str = "CSRFPreventionToken";

/// Client for the Proxmox VE `api2/json` REST API, bound to one node.
#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    client: Client,
    base: String,
    node: String,
}

#[derive(Deserialize)]
struct ResponseBase<T> {
    data: T,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct Ticket {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Deserialize)]
struct CurrentStatus {
    status: VmStatus,
}

impl ProxmoxClient {
    /// Authenticate against the API described by `config`.
    pub async fn connect(config: &PveConfig) -> Result<Self> {
        let base = config.api_base();
        if config.insecure {
            warn!(
                base = %base,
                "TLS certificate verification is DISABLED; the API connection can be intercepted"
            );
        }
        match &config.auth {
            Auth::Token(token) => Self::with_token(&base, &config.node, token, config.insecure),
            Auth::Password { user, password } => {
                Self::login(&base, &config.node, user, password, config.insecure).await
            }
        }
    }

    /// Use a static API token (`USER@REALM!TOKENID=SECRET`).
    pub fn with_token(base: &str, node: &str, token: &str, insecure: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            sensitive(format!("PVEAPIToken={token}"), "Authorization")?,
        );
        Self::build(base, node, headers, insecure)
    }

    /// Log in with user and password and use the returned ticket for all further requests.
    pub async fn login(
        base: &str,
        node: &str,
        user: &str,
        password: &str,
        insecure: bool,
    ) -> Result<Self> {
        let anonymous = Self::build(base, node, HeaderMap::new(), insecure)?;
        let body = LoginRequest {
            username: user,
            password,
        };
        let rsp: ResponseBase<Ticket> = anonymous
            .send(Method::POST, "/api2/json/access/ticket", Some(&body))
            .await
            .map_err(|e| PveError::LoginFailed {
                user: user.to_string(),
                source: e.boxed(),
            })?;
        info!(user, "logged in");

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            sensitive(format!("PVEAuthCookie={}", rsp.data.ticket), "Cookie")?,
        );
        headers.insert(CSRF_HEADER, sensitive(rsp.data.csrf_token, CSRF_HEADER)?);
        Self::build(base, node, headers, insecure)
    }

    fn build(base: &str, node: &str, headers: HeaderMap, insecure: bool) -> Result<Self> {
        let client = ClientBuilder::new()
            .danger_accept_invalid_certs(insecure)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            node: node.to_string(),
        })
    }

    fn vm_path(&self, vmid: VmId, suffix: &str) -> String {
        format!("/api2/json/nodes/{}/qemu/{}{}", self.node, vmid, suffix)
    }

    async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        debug!(">> {} {}", method, path);
        let mut req = self
            .client
            .request(method.clone(), format!("{}{}", self.base, path))
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }
        let rsp = req.send().await?;
        let status = rsp.status();
        let text = rsp.text().await?;
        trace!("<< {}", text);
        if status.is_success() {
            Ok(serde_json::from_str(&text)?)
        } else {
            Err(PveError::Api {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            })
        }
    }

    async fn task<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<TaskId>
    where
        B: Serialize + ?Sized,
    {
        let rsp: ResponseBase<Option<TaskId>> = self.send(method.clone(), path, body).await?;
        rsp.data.ok_or_else(|| PveError::MissingTask {
            method: method.to_string(),
            path: path.to_string(),
        })
    }
}

fn sensitive(value: String, name: &'static str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&value).map_err(|_| PveError::InvalidHeader { name })?;
    value.set_sensitive(true);
    Ok(value)
}

impl VmApi for ProxmoxClient {
    fn node(&self) -> &str {
        &self.node
    }

    /// https://pve.proxmox.com/pve-docs/api-viewer/#/nodes/{node}/qemu
    async fn create_vm(&self, req: &CreateVm) -> Result<TaskId> {
        let path = format!("/api2/json/nodes/{}/qemu", self.node);
        self.task(Method::POST, &path, Some(req)).await
    }

    async fn vm_status(&self, vmid: VmId) -> Result<VmStatus> {
        let rsp: ResponseBase<CurrentStatus> = self
            .send::<_, ()>(Method::GET, &self.vm_path(vmid, "/status/current"), None)
            .await?;
        Ok(rsp.data.status)
    }

    /// https://pve.proxmox.com/pve-docs/api-viewer/#/nodes/{node}/qemu/{vmid}/config
    async fn vm_config(&self, vmid: VmId) -> Result<VmConfig> {
        let rsp: ResponseBase<VmConfig> = self
            .send::<_, ()>(Method::GET, &self.vm_path(vmid, "/config"), None)
            .await?;
        Ok(rsp.data)
    }

    async fn update_config(
        &self,
        vmid: VmId,
        changes: &BTreeMap<String, String>,
    ) -> Result<Option<TaskId>> {
        let rsp: ResponseBase<Option<TaskId>> = self
            .send(Method::POST, &self.vm_path(vmid, "/config"), Some(changes))
            .await?;
        Ok(rsp.data)
    }

    async fn stop_vm(&self, vmid: VmId) -> Result<TaskId> {
        self.task::<()>(Method::POST, &self.vm_path(vmid, "/status/stop"), None)
            .await
    }

    async fn delete_vm(&self, vmid: VmId) -> Result<TaskId> {
        self.task::<()>(Method::DELETE, &self.vm_path(vmid, ""), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VmSpec;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UPID: &str = "UPID:pve:000A1B2C:0D3E4F50:66000000:qmcreate:101:root@pam:";

    fn vmid(id: u32) -> VmId {
        VmId::new(id).unwrap()
    }

    fn token_client(server: &MockServer) -> ProxmoxClient {
        ProxmoxClient::with_token(&server.uri(), "pve", "root@pam!cli=secret", false).unwrap()
    }

    #[tokio::test]
    async fn create_vm_posts_request_with_token() {
        let server = MockServer::start().await;
        let spec = VmSpec {
            vmid: vmid(101),
            name: "test".into(),
            memory_mb: 1024,
            cores: 1,
            disk_gb: 10,
            iso: Some("local:iso/x.iso".into()),
        };
        let req = CreateVm::new(&spec, "local-zfs", "vmbr0");

        Mock::given(method("POST"))
            .and(path("/api2/json/nodes/pve/qemu"))
            .and(header("Authorization", "PVEAPIToken=root@pam!cli=secret"))
            .and(body_json(json!({
                "vmid": 101,
                "name": "test",
                "memory": 1024,
                "cores": 1,
                "sockets": 1,
                "net0": "virtio,bridge=vmbr0",
                "ide2": "local:iso/x.iso,media=cdrom",
                "sata0": "local-zfs:10",
                "ostype": "l26",
                "scsihw": "virtio-scsi-pci",
                "boot": "cdn",
                "bootdisk": "sata0",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": UPID })))
            .expect(1)
            .mount(&server)
            .await;

        let task = token_client(&server).create_vm(&req).await.unwrap();
        assert_eq!(task.as_str(), UPID);
    }

    #[tokio::test]
    async fn login_uses_ticket_for_requests() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api2/json/access/ticket"))
            .and(body_json(json!({ "username": "root@pam", "password": "pw" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "username": "root@pam",
                    "ticket": "PVE:root@pam:66000000::sig",
                    "CSRFPreventionToken": "66000000:csrf",
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api2/json/nodes/pve/qemu/101/status/current"))
            .and(header("Cookie", "PVEAuthCookie=PVE:root@pam:66000000::sig"))
            .and(header("CSRFPreventionToken", "66000000:csrf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "vmid": 101, "status": "running", "name": "test" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProxmoxClient::login(&server.uri(), "pve", "root@pam", "pw", false)
            .await
            .unwrap();
        let status = client.vm_status(vmid(101)).await.unwrap();
        assert!(status.is_running());
    }

    #[tokio::test]
    async fn rejected_login_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api2/json/access/ticket"))
            .respond_with(ResponseTemplate::new(401).set_body_string("authentication failure"))
            .mount(&server)
            .await;

        let err = ProxmoxClient::login(&server.uri(), "pve", "root@pam", "bad", false)
            .await
            .unwrap_err();
        match err {
            PveError::LoginFailed { user, source } => {
                assert_eq!(user, "root@pam");
                assert!(matches!(*source, PveError::Api { status: 401, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn config_read_and_detach() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api2/json/nodes/pve/qemu/101/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "scsi0": "local-zfs:vm-101-disk-0,size=10G",
                    "ide2": "local:iso/x.iso,media=cdrom",
                    "cores": 2,
                    "digest": "abc",
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api2/json/nodes/pve/qemu/101/config"))
            .and(body_json(json!({ "ide2": "none" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": UPID })))
            .expect(1)
            .mount(&server)
            .await;

        let client = token_client(&server);
        let cfg = client.vm_config(vmid(101)).await.unwrap();
        assert_eq!(cfg.boot_disk(), Some("scsi0"));
        assert_eq!(cfg.get("cores").as_deref(), Some("2"));

        let changes = BTreeMap::from([("ide2".to_string(), "none".to_string())]);
        let task = client.update_config(vmid(101), &changes).await.unwrap();
        assert_eq!(task.as_ref().map(TaskId::as_str), Some(UPID));
    }

    #[tokio::test]
    async fn stop_and_delete_paths() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api2/json/nodes/pve/qemu/102/status/stop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": "UPID:stop" })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/api2/json/nodes/pve/qemu/102"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": "UPID:del" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = token_client(&server);
        assert_eq!(client.stop_vm(vmid(102)).await.unwrap().as_str(), "UPID:stop");
        assert_eq!(client.delete_vm(vmid(102)).await.unwrap().as_str(), "UPID:del");
    }

    #[tokio::test]
    async fn missing_vm_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api2/json/nodes/pve/qemu/404/status/current"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "data": null })))
            .mount(&server)
            .await;

        let err = token_client(&server).vm_status(vmid(404)).await.unwrap_err();
        match err {
            PveError::Api {
                method,
                path,
                status,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/api2/json/nodes/pve/qemu/404/status/current");
                assert_eq!(status, 500);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_task_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api2/json/nodes/pve/qemu/103"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": null })))
            .mount(&server)
            .await;

        let err = token_client(&server).delete_vm(vmid(103)).await.unwrap_err();
        assert!(matches!(err, PveError::MissingTask { .. }));
    }
}
