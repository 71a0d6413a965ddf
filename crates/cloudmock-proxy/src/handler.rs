//! Per-connection request routing.
//!
//! Every accepted socket is served as HTTP/1.1. Three request shapes are
//! understood:
//!
//! - `CONNECT host:port`: answered with `200`, then the upgraded stream is
//!   TLS-terminated with a leaf certificate for the destination and the
//!   decrypted requests are dispatched one after another.
//! - Absolute-form requests (`GET http://host/path`): dispatched directly.
//! - Anything else: the client talked to the proxy as if it were the origin,
//!   which earns a `501`.

use std::net::SocketAddr;
use std::sync::Arc;

use http::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use http::uri::{Authority, Uri};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use cloudmock_core::Dispatcher;

use crate::tls::TlsInterceptor;

/// Body type of every response the proxy writes.
pub type ProxyBody = Full<Bytes>;

/// Reply to requests that name no destination.
pub const NOT_A_PROXY_MESSAGE: &str =
    "cloudmock is meant to be used as a proxy server. Don't send requests directly to it.";

/// Serves proxied traffic for one listener.
#[derive(Debug, Clone)]
pub struct ProxyHandler {
    dispatcher: Arc<Dispatcher>,
    tls: TlsInterceptor,
}

impl ProxyHandler {
    /// Creates a handler answering from `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>, tls: TlsInterceptor) -> Self {
        Self { dispatcher, tls }
    }

    /// Serves one accepted client socket until it closes.
    pub async fn serve(self, stream: TcpStream, peer: SocketAddr) {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = self.clone();
            async move { handler.route(req).await }
        });

        if let Err(err) = http1::Builder::new()
            .preserve_header_case(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            debug!(%peer, error = %err, "proxy connection ended with error");
        }
    }

    async fn route(self, req: Request<Incoming>) -> Result<Response<ProxyBody>, hyper::Error> {
        if req.method() == Method::CONNECT {
            return Ok(self.connect(req));
        }

        if is_absolute(req.uri()) {
            return self.dispatch(req).await;
        }

        debug!(uri = %req.uri(), "direct request to proxy listener");
        Ok(text_response(StatusCode::NOT_IMPLEMENTED, NOT_A_PROXY_MESSAGE))
    }

    fn connect(self, req: Request<Incoming>) -> Response<ProxyBody> {
        let Some(authority) = req.uri().authority().cloned() else {
            warn!(uri = %req.uri(), "CONNECT without host:port");
            return text_response(StatusCode::BAD_REQUEST, "CONNECT requires host:port");
        };

        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => self.tunnel(upgraded, authority).await,
                Err(err) => warn!(host = %authority, error = %err, "CONNECT upgrade failed"),
            }
        });

        Response::new(Full::new(Bytes::new()))
    }

    async fn tunnel(self, upgraded: Upgraded, authority: Authority) {
        let host = strip_brackets(authority.host()).to_string();

        let acceptor = match self.tls.acceptor_for(&host) {
            Ok(acceptor) => acceptor,
            Err(err) => {
                warn!(%host, error = %err, "failed to build TLS config");
                return;
            }
        };

        let tls = match acceptor.accept(TokioIo::new(upgraded)).await {
            Ok(tls) => tls,
            Err(err) => {
                warn!(%host, error = %err, "TLS handshake failed");
                return;
            }
        };
        debug!(%host, "TLS tunnel established");

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = self.clone();
            let authority = authority.clone();
            async move { handler.dispatch_tunneled(req, &authority).await }
        });

        if let Err(err) = http1::Builder::new()
            .serve_connection(TokioIo::new(tls), service)
            .await
        {
            debug!(%host, error = %err, "TLS tunnel ended with error");
        }
    }

    async fn dispatch_tunneled(
        self,
        req: Request<Incoming>,
        authority: &Authority,
    ) -> Result<Response<ProxyBody>, hyper::Error> {
        let req = if is_absolute(req.uri()) {
            req
        } else {
            let (mut parts, body) = req.into_parts();
            match tunneled_uri(authority, &parts.uri) {
                Ok(uri) => parts.uri = uri,
                Err(err) => {
                    warn!(uri = %parts.uri, error = %err, "cannot rebuild tunneled URI");
                    return Ok(close(text_response(StatusCode::BAD_REQUEST, "malformed request target")));
                }
            }
            Request::from_parts(parts, body)
        };

        self.dispatch(req).await.map(close)
    }

    async fn dispatch(self, req: Request<Incoming>) -> Result<Response<ProxyBody>, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes().to_vec();
        let req = Request::from_parts(parts, body);

        let resp = self.dispatcher.handle(&req);
        Ok(resp.map(|body| Full::new(Bytes::from(body))))
    }
}

fn is_absolute(uri: &Uri) -> bool {
    uri.scheme().is_some() && uri.authority().is_some()
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// `https://<CONNECT authority><path and query>`
fn tunneled_uri(authority: &Authority, uri: &Uri) -> Result<Uri, http::Error> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Uri::builder()
        .scheme("https")
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
}

fn close(mut resp: Response<ProxyBody>) -> Response<ProxyBody> {
    resp.headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    resp
}

fn text_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let mut resp = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_uri_detection() {
        assert!(is_absolute(&"http://example.com/x".parse().unwrap()));
        assert!(is_absolute(&"https://sts.amazonaws.com".parse().unwrap()));
        assert!(!is_absolute(&"/x?y=1".parse().unwrap()));
        assert!(!is_absolute(&"example.com:443".parse().unwrap()));
    }

    #[test]
    fn tunneled_uri_keeps_query_and_port() {
        let authority: Authority = "ec2.us-east-1.amazonaws.com:443".parse().unwrap();
        let uri: Uri = "/?Action=DescribeInstances&Version=2016-11-15".parse().unwrap();

        let rebuilt = tunneled_uri(&authority, &uri).unwrap();
        assert_eq!(
            rebuilt.to_string(),
            "https://ec2.us-east-1.amazonaws.com:443/?Action=DescribeInstances&Version=2016-11-15"
        );
    }

    #[test]
    fn brackets_are_stripped_from_ipv6_hosts() {
        assert_eq!(strip_brackets("[fd00:ec2::254]"), "fd00:ec2::254");
        assert_eq!(strip_brackets("169.254.169.254"), "169.254.169.254");
        assert_eq!(strip_brackets("sts.amazonaws.com"), "sts.amazonaws.com");
    }

    #[test]
    fn close_sets_connection_header() {
        let resp = close(text_response(StatusCode::OK, "ok"));
        assert_eq!(resp.headers()[CONNECTION], "close");
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }
}
