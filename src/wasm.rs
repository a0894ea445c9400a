use time::format_description::well_known::Rfc3339;
use tracing_subscriber::fmt::format::Pretty;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_web::{performance_layer, MakeWebConsoleWriter};
use worker::*;

use crate::config::Settings;
use crate::handler::{self, HandleError, IngestParams, Reply, ROBOTS_TXT};
use crate::store::{RecordStore, SystemClock, WorkerKv};

/// Initialize tracing for Cloudflare Workers.
/// Must be called via #[event(start)] to run once on worker initialization.
#[event(start)]
fn init() {
    // JSON formatting layer that writes to the Workers console
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_ansi(false)
        .with_timer(UtcTime::new(Rfc3339))
        .with_writer(MakeWebConsoleWriter::new());

    let perf_layer = performance_layer().with_details_from_fields(Pretty::default());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(perf_layer)
        .init();
}

fn settings_from_env(env: &Env) -> Result<Settings> {
    Settings::default()
        .with_lookup(|name| env.var(name).ok().map(|v| v.to_string()))
        .map_err(|e| Error::RustError(e.to_string()))
}

fn plain_text(body: String, status: u16) -> Result<Response> {
    let headers = Headers::new();
    headers.set("Content-Type", "text/plain; charset=utf-8")?;
    Ok(Response::ok(body)?.with_status(status).with_headers(headers))
}

fn into_worker(result: std::result::Result<Reply, HandleError>, debug: bool) -> Result<Response> {
    match result {
        Ok(Reply::Text(body)) => plain_text(body, 200),
        Ok(Reply::Redirect(location)) => {
            let url = Url::parse(&location).map_err(|e| Error::RustError(e.to_string()))?;
            Response::redirect_with_status(url, 302)
        }
        Err(e) => {
            let reply = e.to_reply(debug);
            plain_text(reply.body, reply.status)
        }
    }
}

/// Percent-decode a path segment; worker paths arrive encoded.
fn segment(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[event(fetch)]
pub async fn main(req: Request, env: Env, _ctx: Context) -> Result<Response> {
    let method = req.method();
    let path = req.path();
    let url = req.url()?;

    if method != Method::Get {
        return Response::error("Method Not Allowed", 405);
    }

    let segments: Vec<String> = path.trim_start_matches('/').split('/').map(segment).collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    match segments.as_slice() {
        ["robots.txt"] => return plain_text(ROBOTS_TXT.to_string(), 200),
        ["health"] => return Response::ok("ok"),
        _ => {}
    }

    let settings = settings_from_env(&env)?;
    let store = RecordStore::new(WorkerKv::from_env(&env)?, SystemClock, settings.max_entries);
    let n = url
        .query_pairs()
        .find(|(k, _)| k == "n")
        .map(|(_, v)| v.into_owned());
    let count = handler::parse_count(n.as_deref());

    let result = match segments.as_slice() {
        ["receiver.cgi"] => {
            let params = IngestParams::from_pairs(url.query_pairs());
            handler::handle_ingest(params, &store, &settings).await
        }
        [device_id, "json.get"] => {
            handler::handle_history(device_id, None, count, &store, &settings).await
        }
        [device_id, "setcode", code] => {
            handler::handle_set_code(device_id, None, code, &store, &settings).await
        }
        [device_id, pass_code, "json.get"] => {
            handler::handle_history(device_id, Some(*pass_code), count, &store, &settings).await
        }
        [device_id, pass_code, "map.get"] => {
            handler::handle_map(device_id, pass_code, &store, &settings).await
        }
        [device_id, pass_code, "setcode", code] => {
            handler::handle_set_code(device_id, Some(*pass_code), code, &store, &settings).await
        }
        _ => return Response::error("Not Found", 404),
    };

    into_worker(result, settings.debug)
}
