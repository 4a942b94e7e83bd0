//! # hcx
//!
//! Purpose: Fetch one resource over HTTP or HTTPS and print the response,
//! as a manual check of the client against a real server.
//!
//! Usage: `hcx <host> [port] [path] [--tls] [--strict] [--async]`
//!
//! Set `RUST_LOG=hcx_client=debug` to see transport events.

use std::env;
use std::sync::{mpsc, Arc};

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::EnvFilter;

use hcx_client::{
    Client, ClientConfig, PlainClient, Request, Response, SecureClient, TlsOptions,
};

struct Args {
    host: String,
    port: Option<u16>,
    path: String,
    tls: bool,
    strict: bool,
    asynchronous: bool,
}

impl Args {
    fn from_env() -> Result<Self> {
        let mut positional = Vec::new();
        let mut args = Args {
            host: String::new(),
            port: None,
            path: "/".to_string(),
            tls: false,
            strict: false,
            asynchronous: false,
        };
        for raw in env::args().skip(1) {
            match raw.as_str() {
                "--tls" => args.tls = true,
                "--strict" => args.strict = true,
                "--async" => args.asynchronous = true,
                flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
                _ => positional.push(raw),
            }
        }

        let mut positional = positional.into_iter();
        args.host = positional
            .next()
            .ok_or_else(|| anyhow!("usage: hcx <host> [port] [path] [--tls] [--strict] [--async]"))?;
        if let Some(port) = positional.next() {
            args.port = Some(port.parse().with_context(|| format!("invalid port {port}"))?);
        }
        if let Some(path) = positional.next() {
            args.path = path;
        }
        Ok(args)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let mut config = ClientConfig::default();
    if args.strict {
        config.tls = TlsOptions::strict();
    }

    let mut client: Box<dyn Client> = if args.tls {
        let port = args.port.unwrap_or(SecureClient::DEFAULT_PORT);
        Box::new(SecureClient::with_config(
            args.host.clone(),
            port,
            runtime.handle().clone(),
            config,
        )?)
    } else {
        let port = args.port.unwrap_or(PlainClient::DEFAULT_PORT);
        Box::new(PlainClient::with_config(
            args.host.clone(),
            port,
            runtime.handle().clone(),
            config,
        ))
    };

    client
        .connect()
        .with_context(|| format!("connecting to {}", client.endpoint()))?;

    let request = Request::get(args.path)
        .with_header("host", &args.host)?
        .with_header("connection", "close")?;

    let response = if args.asynchronous {
        let (tx, rx) = mpsc::channel();
        client.query_async(
            Arc::new(request),
            Box::new(move |response, err| {
                let _ = tx.send((response, err));
            }),
        );
        let (response, err) = rx.recv().context("query callback dropped")?;
        match err {
            Some(err) => return Err(err.into()),
            None => response,
        }
    } else {
        client.query(&request)?
    };

    print_response(&response);
    client.disconnect();
    Ok(())
}

fn print_response(response: &Response) {
    println!("{response}");
    for (name, value) in &response.headers {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!();
    println!("{}", String::from_utf8_lossy(&response.body));
}
