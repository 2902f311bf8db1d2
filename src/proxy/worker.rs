//! Per-connection proxy state machine
//!
//! A [`Worker`] owns one client connection and, once it has dialled, one
//! origin connection. Head parsing and body decoding run as sub-tasks that
//! borrow the relevant read side and hand it back; the worker itself only
//! ever waits on one sub-task at a time plus its cancellation token.
//!
//! ```text
//! WaitForRequest -> RequestReceived -> WaitForResponse -> ResponseReceived -> ReceiveBody
//!       |                 |                  |                  |                |
//!       +-----------------+------------------+---> SendErrorResponse             |
//!                                                         |                      |
//!                                                         +------> Finished <----+
//! ```
//!
//! Every state can move to `Finished` on cancellation, and `Finished` closes
//! whichever connections are open exactly once.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::WorkerOptions;
use crate::connection::{BoxedStream, ConnReader, Connection, Peer};
use crate::proxy::body::{encode_chunk, BodyFraming, BodyReader, LAST_CHUNK};
use crate::proxy::dialer::{append_port_if_needed, Dialer};
use crate::proxy::headers::remove_hop_by_hop_headers;
use crate::proxy::message::{Request, Response};
use crate::proxy::parser::{RequestReader, ResponseReader};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    WaitForRequest,
    RequestReceived,
    WaitForResponse,
    ResponseReceived,
    ReceiveBody,
    SendErrorResponse,
    Finished,
}

/// Cancels a running worker from any task.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    token: CancellationToken,
}

impl WorkerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

}

/// What a finished worker went through.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub id: Uuid,
    pub states: Vec<WorkerState>,
    pub request: Option<Request>,
    pub response: Option<Response>,
    pub client_closed: bool,
    /// `None` when no origin connection was ever opened.
    pub server_closed: Option<bool>,
}

pub struct Worker {
    id: Uuid,
    dialer: Arc<dyn Dialer>,
    options: WorkerOptions,
    token: CancellationToken,
    state: WorkerState,
    states: Vec<WorkerState>,
    client: Option<Connection>,
    client_reader: Option<ConnReader>,
    server: Option<Connection>,
    server_reader: Option<ConnReader>,
    request: Option<Request>,
    response: Option<Response>,
    error_response: Option<Response>,
}

impl Worker {
    pub fn new(dialer: Arc<dyn Dialer>, options: WorkerOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            dialer,
            options,
            token: CancellationToken::new(),
            state: WorkerState::WaitForRequest,
            states: Vec::new(),
            client: None,
            client_reader: None,
            server: None,
            server_reader: None,
            request: None,
            response: None,
            error_response: None,
        }
    }

    /// Tie this worker to an outer token, e.g. the server's shutdown token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            token: self.token.clone(),
        }
    }

    /// Drive the state machine for one client connection until `Finished`.
    pub async fn run(
        mut self,
        client: BoxedStream,
        client_addr: impl Into<String>,
    ) -> WorkerReport {
        let client_addr = client_addr.into();
        let span = info_span!("worker", id = %self.id, client = %client_addr);

        async move {
            info!("worker started");
            let (client, client_reader) = Connection::split(client, Peer::Client, client_addr);
            self.client = Some(client);
            self.client_reader = Some(client_reader);

            loop {
                self.states.push(self.state);
                if self.state != WorkerState::Finished && self.token.is_cancelled() {
                    debug!("cancelled in {:?}", self.state);
                    self.state = WorkerState::Finished;
                    continue;
                }

                self.state = match self.state {
                    WorkerState::WaitForRequest => self.wait_for_request().await,
                    WorkerState::RequestReceived => self.request_received().await,
                    WorkerState::WaitForResponse => self.wait_for_response().await,
                    WorkerState::ResponseReceived => self.response_received().await,
                    WorkerState::ReceiveBody => self.receive_body().await,
                    WorkerState::SendErrorResponse => self.send_error_response().await,
                    WorkerState::Finished => break,
                };
            }

            let report = self.finish().await;
            info!("worker finished");
            report
        }
        .instrument(span)
        .await
    }

    fn fail(&mut self, response: Response) -> WorkerState {
        self.error_response = Some(response);
        WorkerState::SendErrorResponse
    }

    async fn wait_for_request(&mut self) -> WorkerState {
        debug!("waiting for request");
        let Some(reader) = self.client_reader.take() else {
            error!("client reader is not available");
            return WorkerState::Finished;
        };
        let mut request_reader: RequestReader<_> =
            RequestReader::start(reader, self.token.child_token());

        tokio::select! {
            res = request_reader.received() => match res {
                Ok((request, reader)) => {
                    self.client_reader = Some(reader);
                    self.request = Some(request);
                    WorkerState::RequestReceived
                }
                Err(Error::Cancelled) => WorkerState::Finished,
                Err(e) => {
                    warn!("failed to read request: {}", e);
                    self.fail(Response::for_error(&e))
                }
            },
            _ = self.token.cancelled() => {
                debug!("cancelled while waiting for request");
                request_reader.cancel().await;
                WorkerState::Finished
            }
        }
    }

    async fn request_received(&mut self) -> WorkerState {
        match self.forward_request().await {
            Ok(next) => next,
            Err(Error::Cancelled) => {
                debug!("cancelled while forwarding request");
                WorkerState::Finished
            }
            Err(e) => {
                warn!("failed to forward request: {}", e);
                self.fail(Response::for_error(&e))
            }
        }
    }

    async fn forward_request(&mut self) -> Result<WorkerState> {
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| Error::internal("no request to forward"))?;

        if !self.options.allowed_methods.iter().any(|m| *m == request.method) {
            return Err(Error::UnsupportedMethod(request.method.clone()));
        }

        let host = request.headers.get("host").ok_or(Error::MissingHost)?;
        let addr = append_port_if_needed(host, self.options.default_port);

        let stream = tokio::select! {
            res = self.dialer.dial(&addr) => res?,
            _ = self.token.cancelled() => return Ok(WorkerState::Finished),
        };
        let (server, server_reader) = Connection::split(stream, Peer::Server, addr);

        if let Some(client) = &self.client {
            info!("{} -> {}", client.address, server.address);
        }
        self.server = Some(server);
        self.server_reader = Some(server_reader);

        let head = match self.request.as_mut() {
            Some(request) => {
                debug!("{} {:?}", request.target, request.headers);
                remove_hop_by_hop_headers(&mut request.headers);
                request.encode_head()
            }
            None => return Err(Error::internal("no request to forward")),
        };
        self.server
            .as_mut()
            .ok_or_else(|| Error::internal("server connection missing"))?
            .write_all_or_cancel(&head, &self.token)
            .await?;

        Ok(WorkerState::WaitForResponse)
    }

    async fn wait_for_response(&mut self) -> WorkerState {
        debug!("waiting for response");
        let Some(reader) = self.server_reader.take() else {
            error!("server reader is not available");
            return self.fail(Response::internal_server_error());
        };
        let mut response_reader: ResponseReader<_> =
            ResponseReader::start(reader, self.token.child_token());

        tokio::select! {
            res = response_reader.received() => match res {
                Ok((response, reader)) => {
                    self.server_reader = Some(reader);
                    self.response = Some(response);
                    WorkerState::ResponseReceived
                }
                Err(Error::Cancelled) => WorkerState::Finished,
                Err(e) => {
                    warn!("failed to read response: {}", e);
                    self.fail(Response::internal_server_error())
                }
            },
            _ = self.token.cancelled() => {
                debug!("cancelled while waiting for response");
                response_reader.cancel().await;
                WorkerState::Finished
            }
        }
    }

    async fn response_received(&mut self) -> WorkerState {
        let Some(response) = self.response.as_ref() else {
            error!("no response to relay");
            return WorkerState::Finished;
        };
        info!("response: {} {}", response.status, response.phrase);
        debug!("response headers: {:?}", response.headers);

        let has_body = self
            .request
            .as_ref()
            .map_or(true, |request| response.has_body(&request.method));
        let head = response.encode_head();

        let Some(client) = self.client.as_mut() else {
            return WorkerState::Finished;
        };
        match client.write_all_or_cancel(&head, &self.token).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                debug!("cancelled while sending response head");
                return WorkerState::Finished;
            }
            Err(e) => {
                warn!("failed to send response head: {}", e);
                return WorkerState::Finished;
            }
        }

        if has_body {
            WorkerState::ReceiveBody
        } else {
            debug!("response carries no body");
            WorkerState::Finished
        }
    }

    async fn receive_body(&mut self) -> WorkerState {
        let (Some(reader), Some(response)) = (self.server_reader.take(), self.response.as_ref())
        else {
            error!("body transfer without a response");
            return WorkerState::Finished;
        };
        let body = match BodyReader::new(reader, &response.headers, self.options.body_buffer_size) {
            Ok(body) => body,
            Err(e) => {
                error!("{}", e);
                return WorkerState::Finished;
            }
        };
        let chunked = body.framing() == BodyFraming::Chunked;
        debug!("transferring body: {:?}", body.framing());

        let token = self.token.clone();
        let mut transfer = body.start(self.options.body_channel_capacity, token.child_token());
        let Some(client) = self.client.as_mut() else {
            transfer.cancel().await;
            return WorkerState::Finished;
        };

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    warn!("body transfer cancelled");
                    transfer.cancel().await;
                    return WorkerState::Finished;
                }
                item = transfer.body_received() => match item {
                    Some(Ok(chunk)) if chunk.is_empty() => {
                        if chunked {
                            if let Err(e) = client.write_all_or_cancel(LAST_CHUNK, &token).await {
                                warn!("write failed while sending last chunk: {}", e);
                            }
                        }
                        debug!("body received done");
                        transfer.finish().await;
                        return WorkerState::Finished;
                    }
                    Some(Ok(chunk)) => {
                        let written = if chunked {
                            client.write_all_or_cancel(&encode_chunk(&chunk), &token).await
                        } else {
                            client.write_all_or_cancel(&chunk, &token).await
                        };
                        match written {
                            Ok(()) => {}
                            Err(Error::Cancelled) => {
                                warn!("body transfer cancelled while writing to client");
                                transfer.cancel().await;
                                return WorkerState::Finished;
                            }
                            Err(e) => {
                                warn!("write failed while relaying body: {}", e);
                                transfer.cancel().await;
                                return WorkerState::Finished;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("body reader error: {}", e);
                        transfer.finish().await;
                        return WorkerState::Finished;
                    }
                    None => {
                        debug!("body reader stopped");
                        return WorkerState::Finished;
                    }
                }
            }
        }
    }

    async fn send_error_response(&mut self) -> WorkerState {
        let response = self
            .error_response
            .take()
            .unwrap_or_else(Response::internal_server_error);
        warn!("sending error response: {} {}", response.status, response.phrase);

        let head = response.encode_head();
        if let Some(client) = self.client.as_mut() {
            if let Err(e) = client.write_all_or_cancel(&head, &self.token).await {
                warn!("write failed while sending error response: {}", e);
            }
        }
        WorkerState::Finished
    }

    async fn finish(mut self) -> WorkerReport {
        let client_closed = match self.client.as_mut() {
            Some(client) => {
                debug!("client conn closing");
                client.close().await;
                !client.is_open()
            }
            None => false,
        };
        let server_closed = match self.server.as_mut() {
            Some(server) => {
                debug!("server conn closing");
                server.close().await;
                Some(!server.is_open())
            }
            None => None,
        };
        self.client_reader = None;
        self.server_reader = None;
        self.token.cancel();

        WorkerReport {
            id: self.id,
            states: self.states,
            request: self.request,
            response: self.response,
            client_closed,
            server_closed,
        }
    }
}
