//! Client library for the container service.

use crate::container::{
    decode_attr_get, decode_attr_list, encode_attr_get, encode_attr_set, AttrValue, Bulk,
    ContOpIn, ContQueryInfo, ContReply, ContReplyBody, ContRequest, ContRequestBody, EpochState,
    OidFetchAddReply, OidFetchAddRequest,
};
use crate::error::{status, CofferError, Result};
use crate::server::{PoolConnectRequest, PoolDisconnectRequest, PoolReply};
use crate::types::{ContOpenFlags, Epoch, LeaderHint, ObjectId, PoolCapas, PoolHandleId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Default connection timeout for client requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for client operations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn check(rc: i32, hint: LeaderHint, error: Option<String>) -> Result<()> {
    match rc {
        status::SUCCESS => Ok(()),
        status::NOT_LEADER => Err(CofferError::NotLeader { hint }),
        rc => Err(CofferError::from_status(rc, error.unwrap_or_default())),
    }
}

fn unexpected(body: ContReplyBody) -> CofferError {
    CofferError::Protocol(format!("unexpected reply body {:?}", body))
}

/// Client for a container service node.
#[derive(Clone)]
pub struct ContClient {
    base_url: String,
    client: Client,
}

impl ContClient {
    /// Create a new client with default timeouts.
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_timeouts(addr, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a new client with custom timeouts.
    pub fn with_timeouts(
        addr: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: format!("http://{}", addr),
            client,
        }
    }

    /// Create from address string.
    pub fn from_addr(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| CofferError::InvalidArgument(format!("Invalid address: {}", e)))?;
        Ok(Self::new(addr))
    }

    /// Check server health.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CofferError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| CofferError::Network(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| CofferError::Deserialization(e.to_string()))
    }

    /// Connect a pool handle with the given capabilities.
    pub async fn connect(&self, pool_hdl: PoolHandleId, capas: PoolCapas) -> Result<()> {
        let reply: PoolReply = self
            .post("/pool/connect", &PoolConnectRequest { pool_hdl, capas })
            .await?;
        check(reply.rc, reply.hint, reply.error)
    }

    /// Revoke pool handles and every container handle opened through them.
    pub async fn disconnect(&self, pool_hdls: &[PoolHandleId]) -> Result<()> {
        let request = PoolDisconnectRequest {
            pool_hdls: pool_hdls.to_vec(),
        };
        let reply: PoolReply = self.post("/pool/disconnect", &request).await?;
        check(reply.rc, reply.hint, reply.error)
    }

    /// Send one container RPC and return its reply body.
    pub async fn call(&self, op: ContOpIn, body: ContRequestBody) -> Result<ContReplyBody> {
        let reply: ContReply = self.post("/cont/op", &ContRequest { op, body }).await?;
        check(reply.rc, reply.hint, reply.error)?;
        Ok(reply.body)
    }

    pub async fn create(&self, op: ContOpIn) -> Result<()> {
        self.call(op, ContRequestBody::Create).await.map(|_| ())
    }

    pub async fn destroy(&self, op: ContOpIn, force: bool) -> Result<()> {
        self.call(op, ContRequestBody::Destroy { force })
            .await
            .map(|_| ())
    }

    pub async fn open(&self, op: ContOpIn, capas: ContOpenFlags) -> Result<()> {
        self.call(op, ContRequestBody::Open { capas })
            .await
            .map(|_| ())
    }

    pub async fn close(&self, op: ContOpIn) -> Result<()> {
        self.call(op, ContRequestBody::Close).await.map(|_| ())
    }

    pub async fn query(&self, op: ContOpIn) -> Result<ContQueryInfo> {
        match self.call(op, ContRequestBody::Query).await? {
            ContReplyBody::Query { info } => Ok(info),
            body => Err(unexpected(body)),
        }
    }

    pub async fn attr_set(&self, op: ContOpIn, attrs: &[(&str, &[u8])]) -> Result<()> {
        let (count, bulk) = encode_attr_set(attrs)?;
        self.call(op, ContRequestBody::AttrSet { count, bulk })
            .await
            .map(|_| ())
    }

    /// Fetch attributes, reading at most `sizes[i]` bytes of `names[i]`.
    /// A zero size fetches only the value's length.
    pub async fn attr_get(
        &self,
        op: ContOpIn,
        names: &[&str],
        sizes: &[u64],
    ) -> Result<Vec<AttrValue>> {
        let request = encode_attr_get(names, sizes)?;
        let body = ContRequestBody::AttrGet {
            count: request.count,
            key_length: request.key_length,
            bulk: request.bulk.clone(),
        };
        match self.call(op, body).await? {
            ContReplyBody::AttrGet { bulk } => decode_attr_get(&request, &bulk),
            body => Err(unexpected(body)),
        }
    }

    /// List attribute names into a buffer of `capacity` bytes. Returns the
    /// total length of all names and those that fit. With no capacity only
    /// the total is fetched.
    pub async fn attr_list(
        &self,
        op: ContOpIn,
        capacity: Option<usize>,
    ) -> Result<(u64, Vec<String>)> {
        let bulk = capacity.map(Bulk::with_len);
        match self.call(op, ContRequestBody::AttrList { bulk }).await? {
            ContReplyBody::AttrList { size, bulk } => {
                let names = match bulk {
                    Some(bulk) => decode_attr_list(&bulk)?,
                    None => Vec::new(),
                };
                Ok((size, names))
            }
            body => Err(unexpected(body)),
        }
    }

    pub async fn epoch_commit(&self, op: ContOpIn, epoch: Epoch) -> Result<EpochState> {
        self.epoch_call(op, ContRequestBody::EpochCommit { epoch })
            .await
    }

    pub async fn epoch_discard(&self, op: ContOpIn, epoch: Epoch) -> Result<EpochState> {
        self.epoch_call(op, ContRequestBody::EpochDiscard { epoch })
            .await
    }

    pub async fn snap_create(&self, op: ContOpIn, epoch: Epoch) -> Result<EpochState> {
        self.epoch_call(op, ContRequestBody::SnapCreate { epoch })
            .await
    }

    async fn epoch_call(&self, op: ContOpIn, body: ContRequestBody) -> Result<EpochState> {
        match self.call(op, body).await? {
            ContReplyBody::Epoch { state } => Ok(state),
            body => Err(unexpected(body)),
        }
    }

    /// Snapshot count and up to `capacity` snapshot epochs.
    pub async fn snap_list(&self, op: ContOpIn, capacity: u32) -> Result<(u64, Vec<Epoch>)> {
        match self.call(op, ContRequestBody::SnapList { capacity }).await? {
            ContReplyBody::SnapList { total, epochs } => Ok((total, epochs)),
            body => Err(unexpected(body)),
        }
    }

    pub async fn snap_destroy(&self, op: ContOpIn, epoch: Epoch) -> Result<()> {
        self.call(op, ContRequestBody::SnapDestroy { epoch })
            .await
            .map(|_| ())
    }

    /// Reserve `count` object ids and return the first.
    pub async fn oid_fetch_add(&self, op: ContOpIn, count: u64) -> Result<ObjectId> {
        let request = OidFetchAddRequest {
            pool_hdl: op.pool_hdl,
            cont: op.cont,
            hdl: op.hdl,
            count,
        };
        let reply: OidFetchAddReply = self.post("/cont/oid", &request).await?;
        check(reply.rc, reply.hint, reply.error)?;
        Ok(reply.oid)
    }
}
