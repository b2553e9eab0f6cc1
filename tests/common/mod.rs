//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use hmvc_router::config::{ApplicationConfig, ExternalConfig};
use hmvc_router::dispatch::{Controller, ControllerRegistry, Dispatcher, Exchange, HttpExternalClient};
use hmvc_router::error::HandlerResult;
use hmvc_router::routing::{Route, RouteParams, RouteTable};

/// Start a backend on an ephemeral port that answers every request with
/// a fixed status line and body.
pub async fn start_mock_backend(status_line: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nX-Backend: mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// `users` controller: echoes its action and arguments.
pub struct Users;

#[async_trait]
impl Controller for Users {
    fn actions(&self) -> &[&'static str] {
        &["index", "edit", "explode", "link", "form"]
    }

    async fn action(
        &mut self,
        name: &str,
        args: &RouteParams,
        exchange: &mut Exchange<'_>,
    ) -> HandlerResult {
        match name {
            "edit" => {
                let id = args.get("id").unwrap_or("none");
                exchange.response.set_body(format!("editing user {id}"));
            }
            "explode" => return Err("user store unavailable".into()),
            "link" => {
                let params: RouteParams = [("controller", "users"), ("action", "edit"), ("id", "9")]
                    .into_iter()
                    .collect();
                let url = exchange.url("default", &params)?;
                exchange.response.set_body(url);
            }
            "form" => {
                let name = exchange.request.post_value("name").unwrap_or("anonymous").to_string();
                exchange.response.set_body(format!("hello {name}"));
                exchange
                    .response
                    .set_cookie("visited", "1", Default::default());
            }
            _ => exchange.response.set_body("user list"),
        }
        Ok(())
    }
}

/// `pages` controller: issues nested requests.
pub struct Pages;

#[async_trait]
impl Controller for Pages {
    fn actions(&self) -> &[&'static str] {
        &["widget", "guarded", "lost"]
    }

    async fn action(
        &mut self,
        name: &str,
        _args: &RouteParams,
        exchange: &mut Exchange<'_>,
    ) -> HandlerResult {
        match name {
            "widget" => {
                let inner = exchange.sub_request("users/edit/7").await?;
                let body = format!(
                    "page[{}] depth={}",
                    String::from_utf8_lossy(inner.body()),
                    exchange.current_depth()
                );
                exchange.response.set_body(body);
            }
            "guarded" => {
                let before = exchange.current_uri();
                let failure = exchange.sub_request("users/explode").await.err();
                let after = exchange.current_uri();
                exchange.response.set_body(format!(
                    "before={} after={} inner_status={}",
                    before.unwrap_or_default(),
                    after.unwrap_or_default(),
                    failure.map(|f| f.response.status()).unwrap_or(0),
                ));
            }
            _ => {
                exchange.sub_request("nowhere/at/all").await?;
            }
        }
        Ok(())
    }
}

pub fn default_route() -> Route {
    Route::new("(<controller>(/<action>(/<id>)))")
        .unwrap()
        .with_defaults([("controller", "welcome"), ("action", "index")])
}

pub fn registry() -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();
    registry
        .register("users", |_| Box::new(Users))
        .register("pages", |_| Box::new(Pages));
    registry
}

/// Dispatcher over the default route with `users` and `pages` registered.
pub fn dispatcher(app: ApplicationConfig) -> Arc<Dispatcher> {
    let mut table = RouteTable::new();
    table.set("default", default_route());

    Arc::new(Dispatcher::new(
        Arc::new(ArcSwap::from_pointee(table)),
        Arc::new(registry()),
        Arc::new(HttpExternalClient::new(&ExternalConfig::default()).unwrap()),
        app,
    ))
}
