//! Browser-side tracking script and its injection into the frontend entry page.

use std::io;
use std::path::{Path, PathBuf};

use lw_core::config::ReceiverConfig;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const SCRIPT_ID: &str = "livewire-console-tracker";

const ENTRY_CANDIDATES: &[&str] = &[
    "public/index.html",
    "index.html",
    "src/index.html",
    "app/index.html",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectOutcome {
    Injected(PathBuf),
    AlreadyPresent(PathBuf),
    NoEntryPoint,
}

/// The script served inline in the page. Every reporting path swallows its own
/// failures so the host page is never affected by an absent listener.
pub fn tracking_script(config: &ReceiverConfig) -> String {
    let base = format!("http://{}:{}", config.host, config.port);
    let error_url = format!("{base}{}", config.error_path);
    let network_url = format!("{base}{}", config.network_path);
    format!(
        r#"<script id="{SCRIPT_ID}">
(function () {{
  var ERROR_URL = "{error_url}";
  var NETWORK_URL = "{network_url}";
  var nativeFetch = window.fetch ? window.fetch.bind(window) : null;
  function post(url, body) {{
    try {{
      if (!nativeFetch) return;
      nativeFetch(url, {{
        method: "POST",
        headers: {{ "Content-Type": "application/json" }},
        body: JSON.stringify(body)
      }}).catch(function () {{}});
    }} catch (e) {{}}
  }}
  function text(args) {{
    try {{
      return Array.prototype.map.call(args, function (a) {{
        if (a instanceof Error) return a.message;
        if (typeof a === "object") {{ try {{ return JSON.stringify(a); }} catch (e) {{ return String(a); }} }}
        return String(a);
      }}).join(" ");
    }} catch (e) {{ return ""; }}
  }}
  function report(type, message, stack, source) {{
    post(ERROR_URL, {{
      type: type,
      message: message,
      stack: stack || null,
      source: source || null,
      url: window.location.href,
      timestamp: Date.now()
    }});
  }}
  var origError = console.error;
  console.error = function () {{
    var err = Array.prototype.find.call(arguments, function (a) {{ return a instanceof Error; }});
    report("error", text(arguments), err && err.stack);
    return origError.apply(console, arguments);
  }};
  var origWarn = console.warn;
  console.warn = function () {{
    report("warning", text(arguments));
    return origWarn.apply(console, arguments);
  }};
  window.addEventListener("error", function (e) {{
    var stack = e.error && e.error.stack;
    var where = e.filename ? e.filename + ":" + e.lineno + ":" + e.colno : null;
    report("error", e.message, stack || (where ? "at " + where : null), e.filename);
  }});
  window.addEventListener("unhandledrejection", function (e) {{
    var r = e.reason;
    report("unhandledrejection", r && r.message ? r.message : String(r), r && r.stack);
  }});
  if (nativeFetch) {{
    window.fetch = function (input, init) {{
      var url = typeof input === "string" ? input : (input && input.url) || String(input);
      var method = (init && init.method) || (input && input.method) || "GET";
      if (url.indexOf(ERROR_URL) === 0 || url.indexOf(NETWORK_URL) === 0) {{
        return nativeFetch(input, init);
      }}
      var started = Date.now();
      return nativeFetch(input, init).then(function (res) {{
        post(NETWORK_URL, {{ method: method, url: url, status: res.status, duration: Date.now() - started }});
        return res;
      }}, function (err) {{
        post(NETWORK_URL, {{ method: method, url: url, duration: Date.now() - started, error: String(err) }});
        throw err;
      }});
    }};
  }}
}})();
</script>"#
    )
}

/// Locate the HTML entry point of the frontend: well-known locations first,
/// then any `index.html` below the frontend directory.
pub fn find_entry_point(frontend_dir: &Path) -> Option<PathBuf> {
    if let Some(found) = ENTRY_CANDIDATES
        .iter()
        .map(|rel| frontend_dir.join(rel))
        .find(|p| p.is_file())
    {
        return Some(found);
    }
    WalkDir::new(frontend_dir)
        .max_depth(4)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !matches!(name.as_ref(), "node_modules" | "dist" | "build" | ".next" | ".git")
        })
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name() == "index.html")
        .map(|e| e.into_path())
}

/// Insert `script` before `</body>`, else before `</head>`, else at the end.
/// Returns `None` when the script is already present.
pub fn inject_into(html: &str, script: &str) -> Option<String> {
    if html.contains(SCRIPT_ID) {
        return None;
    }
    let lower = html.to_ascii_lowercase();
    let at = lower.rfind("</body>").or_else(|| lower.find("</head>"));
    Some(match at {
        Some(pos) => format!("{}{}\n{}", &html[..pos], script, &html[pos..]),
        None => format!("{html}\n{script}\n"),
    })
}

/// Inject the tracking script into the project's frontend entry page.
pub fn inject(frontend_dir: &Path, config: &ReceiverConfig) -> io::Result<InjectOutcome> {
    let Some(entry) = find_entry_point(frontend_dir) else {
        debug!(dir = %frontend_dir.display(), "no frontend entry page found");
        return Ok(InjectOutcome::NoEntryPoint);
    };
    let html = std::fs::read_to_string(&entry)?;
    match inject_into(&html, &tracking_script(config)) {
        None => Ok(InjectOutcome::AlreadyPresent(entry)),
        Some(updated) => {
            std::fs::write(&entry, updated)?;
            info!(file = %entry.display(), "tracking script injected");
            Ok(InjectOutcome::Injected(entry))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_points_at_configured_routes() {
        let script = tracking_script(&ReceiverConfig::default());
        assert!(script.contains("http://127.0.0.1:7777/livewire/console-error"));
        assert!(script.contains("http://127.0.0.1:7777/livewire/network"));
        assert!(script.contains("unhandledrejection"));
        assert!(script.starts_with(&format!("<script id=\"{SCRIPT_ID}\">")));
    }

    #[test]
    fn injects_before_closing_body() {
        let html = "<html><head></head><body><div id=\"root\"></div></body></html>";
        let out = inject_into(html, "<script id=\"livewire-console-tracker\"></script>").unwrap();
        assert!(out.contains("<div id=\"root\"></div><script id=\"livewire-console-tracker\"></script>\n</body>"));
        assert!(inject_into(&out, "<script></script>").is_none());
    }

    #[test]
    fn falls_back_to_head_then_append() {
        let out = inject_into("<HEAD></HEAD><p>x</p>", "S").unwrap();
        assert!(out.starts_with("<HEAD>S\n</HEAD>"));
        let out = inject_into("<p>x</p>", "S").unwrap();
        assert_eq!(out, "<p>x</p>\nS\n");
    }

    #[test]
    fn injection_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(&public).unwrap();
        let page = public.join("index.html");
        std::fs::write(&page, "<body></body>").unwrap();

        let config = ReceiverConfig::default();
        assert_eq!(inject(dir.path(), &config).unwrap(), InjectOutcome::Injected(page.clone()));
        let once = std::fs::read_to_string(&page).unwrap();
        assert_eq!(inject(dir.path(), &config).unwrap(), InjectOutcome::AlreadyPresent(page.clone()));
        assert_eq!(std::fs::read_to_string(&page).unwrap(), once);
    }

    #[test]
    fn nested_entry_is_found_outside_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let vendored = dir.path().join("node_modules/pkg");
        let nested = dir.path().join("pages/home");
        std::fs::create_dir_all(&vendored).unwrap();
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(vendored.join("index.html"), "").unwrap();
        std::fs::write(nested.join("index.html"), "").unwrap();

        assert_eq!(find_entry_point(dir.path()), Some(nested.join("index.html")));
        assert_eq!(find_entry_point(&dir.path().join("missing")), None);
    }
}
