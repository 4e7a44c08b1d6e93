use std::fs;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::Parser;
use http::{HeaderMap, HeaderName, HeaderValue, Method, header};

use httpdisk::cli::Cli;
use httpdisk::client::{Client, Forward, ReqwestForward, Response, RetryForward};
use httpdisk::logging;
use httpdisk::request::RequestDescriptor;
use httpdisk::settings::Settings;
use httpdisk::util::{parse_url, resolve_redirect};

const MAX_REDIRECTS: usize = 10;

const METHODS: &[Method] = &[
    Method::DELETE,
    Method::GET,
    Method::HEAD,
    Method::OPTIONS,
    Method::PATCH,
    Method::POST,
    Method::PUT,
    Method::TRACE,
];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("httpdisk: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(&cli)?;
    logging::init_logger(settings.log)?;

    let request = build_request(&cli)?;
    let client = Client::new(settings.clone());

    // --status never touches the network
    if cli.status {
        let report = client.status(&request)?;
        println!("url: {:?}", report.url);
        println!("status: {}", report.status);
        println!("key: {:?}", report.key);
        println!("digest: {:?}", report.digest);
        println!("path: {:?}", report.path);
        return Ok(());
    }

    let inner = ReqwestForward::new(
        settings.proxy.as_deref(),
        cli.max_time.map(Duration::from_secs),
    )?;
    let forward: Box<dyn Forward> = match cli.retry {
        Some(max) => Box::new(RetryForward::new(inner, max)),
        None => Box::new(inner),
    };

    let response = fetch(&client, forward.as_ref(), request).await?;
    if response.status >= 400 {
        bail!(
            "the requested URL returned error: {} {}",
            response.status,
            response.reason
        );
    }

    match &cli.output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("could not write {}", path.display()))?;
            output(&response, cli.include, file)
        }
        None => output(&response, cli.include, std::io::stdout().lock()),
    }
}

/// Run the request through the cache, following redirects so that every hop
/// is cached individually.
async fn fetch(
    client: &Client,
    forward: &dyn Forward,
    mut request: RequestDescriptor,
) -> Result<Response> {
    let mut response = client.intercept(&request, forward).await?;
    let mut hops = 0;
    while (300..400).contains(&response.status) {
        let Some(location) = response.headers.get(header::LOCATION) else {
            break;
        };
        hops += 1;
        if hops > MAX_REDIRECTS {
            bail!("too many redirects");
        }
        let location = location.to_str().context("invalid redirect location")?;
        let url = resolve_redirect(&request.url, location)?;
        request = match response.status {
            // 307/308 preserve the method and body
            307 | 308 => RequestDescriptor {
                url,
                ..request.clone()
            },
            _ => RequestDescriptor::new(Method::GET, url).with_headers(request.headers.clone()),
        };
        response = client.intercept(&request, forward).await?;
    }
    Ok(response)
}

fn build_request(cli: &Cli) -> Result<RequestDescriptor> {
    let url = parse_url(&cli.url)?;
    let mut request = RequestDescriptor::new(request_method(cli)?, url)
        .with_headers(request_headers(cli)?);
    if let Some(data) = &cli.data {
        request = request.with_body(Bytes::from(data.clone()));
    }
    Ok(request)
}

/// Explicit -X wins, otherwise --data implies POST and everything else GET.
fn request_method(cli: &Cli) -> Result<Method> {
    let Some(name) = &cli.request else {
        return Ok(if cli.data.is_some() {
            Method::POST
        } else {
            Method::GET
        });
    };
    let method = Method::from_bytes(name.to_ascii_uppercase().as_bytes())
        .ok()
        .filter(|method| METHODS.contains(method));
    method.with_context(|| format!("invalid --request {name:?}"))
}

fn request_headers(cli: &Cli) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(agent) = &cli.user_agent {
        headers.insert(header::USER_AGENT, agent.parse()?);
    }
    for raw in &cli.headers {
        let (name, value) = raw
            .split_once(": ")
            .filter(|(name, value)| !name.is_empty() && !value.is_empty())
            .with_context(|| format!("invalid --header {raw:?}"))?;
        headers.insert(
            name.parse::<HeaderName>()
                .with_context(|| format!("invalid --header {raw:?}"))?,
            value
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid --header {raw:?}"))?,
        );
    }
    // --data is form encoded unless the caller says otherwise
    if cli.data.is_some() && !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
    }
    Ok(headers)
}

fn output(response: &Response, include: bool, mut sink: impl Write) -> Result<()> {
    if include {
        writeln!(sink, "HTTPDISK {} {}", response.status, response.reason)?;
        for (name, value) in &response.headers {
            writeln!(sink, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(sink)?;
    }
    sink.write_all(&response.body)?;
    Ok(())
}
