//! Z39.50 adapter driving the external `yaz-client` program.
//!
//! Each lookup spawns the client, feeds it a short command script on stdin
//! and parses the text MARC record it prints. Only ISBN searches
//! (`@attr 1=7`) are issued.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::identifier::Identifier;
use crate::rate_limiter::RateLimiter;
use crate::record::{PartialRecord, WantedFields};

use super::utils::accept_call_number;
use super::{
    AdapterContext, KindSupport, ProbeStatus, SourceAdapter, SourceError, SourceKind,
    SourcePolicy, SourceSettings, ensure_supported,
};

/// Server banner some targets print on stderr; not an error.
const BENIGN_STDERR_BANNER: &str = "Innovative Interfaces Inc. Z39.50 SERVER version 1.1";

/// Call number and OCLC number read from a text MARC record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarcFields {
    /// Field 050 `$a` with `$b` appended.
    pub lccn: Option<String>,
    /// Field 079 `$a` without the `(OCoLC)` and `ocm`/`ocn`/`on` prefixes.
    pub oclc: Option<String>,
}

/// Parses the text MARC rendering printed by `yaz-client show`.
///
/// Lines whose subfields are missing are skipped.
///
/// # Examples
///
/// ```
/// use harvester_core::source::parse_text_marc;
///
/// let fields = parse_text_marc("050  0 $a QA76.73.P98 $b L88 2013\n079    $a ocm18395\n");
/// assert_eq!(fields.lccn.as_deref(), Some("QA76.73.P98 L88 2013"));
/// assert_eq!(fields.oclc.as_deref(), Some("18395"));
/// ```
#[must_use]
pub fn parse_text_marc(text: &str) -> MarcFields {
    let mut fields = MarcFields::default();
    for line in text.lines() {
        let line = line.trim_start();
        let Some(tag) = line.get(..3) else {
            continue;
        };
        match tag {
            "050" => {
                if let Some((_, rest)) = line.split_once("$a") {
                    let value = rest.replace("$b ", "").replace("$b", "");
                    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
                    if !value.is_empty() {
                        fields.lccn = Some(value);
                    }
                } else {
                    debug!(line, "050 field without $a subfield");
                }
            }
            "079" => {
                let before_z = line.split("$z").next().unwrap_or_default();
                if let Some((_, rest)) = before_z.split_once("$a") {
                    let value = rest.trim().to_lowercase().replace("(ocolc)", "");
                    let value = value.trim();
                    let value = ["ocm", "ocn", "on"]
                        .iter()
                        .find_map(|prefix| value.strip_prefix(prefix))
                        .unwrap_or(value)
                        .trim();
                    if !value.is_empty() {
                        fields.oclc = Some(value.to_string());
                    }
                } else {
                    debug!(line, "079 field without $a subfield");
                }
            }
            _ => {}
        }
    }
    fields
}

/// Output of one `yaz-client` session.
struct ClientOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl ClientOutput {
    fn stderr_is_benign(&self) -> bool {
        let stderr = self.stderr.trim();
        stderr.is_empty() || stderr.contains(BENIGN_STDERR_BANNER)
    }
}

/// One configured Z39.50 target.
pub struct Z3950Adapter {
    ctx: AdapterContext,
    target: String,
    client_path: PathBuf,
}

impl Z3950Adapter {
    /// Creates the adapter for target `name` at `target` (`host:port/database`).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Precondition`] when the target string is blank.
    pub fn new(
        name: &str,
        target: &str,
        settings: &SourceSettings,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SourceError> {
        let target = target.trim();
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(SourceError::precondition(
                name,
                &format!("invalid Z39.50 target '{target}'"),
                "Use the form host:port/database in z3950_sources",
            ));
        }
        let policy = settings.policy_for(name, SourceKind::LegacyProtocol, KindSupport::IsbnOnly);
        Ok(Self {
            ctx: AdapterContext::new(policy, limiter),
            target: target.to_string(),
            client_path: settings.yaz_client_path.clone(),
        })
    }

    /// Returns the `host:port/database` target.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    fn search_script(&self, isbn: &str) -> String {
        format!(
            "open {}\nfind @attr 1=7 {isbn}\nshow 1\nquit\n",
            self.target
        )
    }

    async fn run_client(&self, script: String) -> Result<ClientOutput, SourceError> {
        let source = self.ctx.name();
        self.ctx.limiter.acquire(source).await;
        debug!(source, target = %self.target, "running yaz-client");

        let mut child = Command::new(&self.client_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::NotFound {
                    SourceError::precondition(
                        source,
                        &format!("'{}' was not found", self.client_path.display()),
                        "Install YAZ or set yaz_client_path in the configuration file",
                    )
                } else {
                    SourceError::transient(source, &format!("failed to start yaz-client: {error}"))
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await.map_err(|error| {
                SourceError::transient(source, &format!("failed to write to yaz-client: {error}"))
            })?;
        }

        let timeout = self.policy().timeout;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| SourceError::timeout(source, timeout))?
            .map_err(|error| {
                SourceError::transient(source, &format!("yaz-client failed: {error}"))
            })?;

        Ok(ClientOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl std::fmt::Debug for Z3950Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Z3950Adapter")
            .field("name", &self.ctx.name())
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for Z3950Adapter {
    fn policy(&self) -> &SourcePolicy {
        &self.ctx.policy
    }

    #[instrument(skip(self, wanted), fields(source = %self.ctx.name(), identifier = %identifier))]
    async fn fetch(
        &self,
        identifier: &Identifier,
        wanted: &WantedFields,
    ) -> Result<PartialRecord, SourceError> {
        ensure_supported(self.policy(), identifier)?;
        let source = self.ctx.name();

        let output = self.run_client(self.search_script(identifier.value())).await?;
        if !output.stderr_is_benign() {
            return Err(SourceError::transient(
                source,
                &format!("yaz-client reported: {}", output.stderr.trim()),
            ));
        }
        if !output.success {
            return Err(SourceError::transient(source, "yaz-client exited with failure"));
        }

        let fields = parse_text_marc(&output.stdout);
        let mut partial = PartialRecord::new();
        if let Some(lccn) = fields
            .lccn
            .as_deref()
            .and_then(|candidate| accept_call_number(source, candidate))
        {
            partial = partial.with_lccn(lccn);
        }
        if let Some(oclc) = fields.oclc {
            partial = partial.with_oclc(oclc);
        }
        Ok(partial.retain_wanted(wanted))
    }

    async fn probe_status(&self, _sample: &Identifier) -> ProbeStatus {
        let script = format!("open {}\nquit\n", self.target);
        match self.run_client(script).await {
            Ok(output) if output.success && output.stderr_is_benign() => ProbeStatus::Reachable,
            Ok(output) => {
                debug!(source = %self.ctx.name(), stderr = %output.stderr.trim(), "probe rejected");
                ProbeStatus::Unreachable
            }
            Err(error) => {
                warn!(source = %self.ctx.name(), error = %error, "probe failed");
                ProbeStatus::Unreachable
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::Field;
    use std::time::Duration;

    #[test]
    fn test_parse_text_marc_reads_050_and_079() {
        let text = "\
001 12345
050  0 $a PS3545.I345 $b Z5 1990
079    $a (OCoLC)ocn123456 $z (OCoLC)999
245 10 $a Title
";
        let fields = parse_text_marc(text);
        assert_eq!(fields.lccn.as_deref(), Some("PS3545.I345 Z5 1990"));
        assert_eq!(fields.oclc.as_deref(), Some("123456"));
    }

    #[test]
    fn test_parse_text_marc_skips_malformed_lines() {
        let fields = parse_text_marc("050 without subfields\n079 nothing here\n07\n");
        assert_eq!(fields, MarcFields::default());
    }

    #[test]
    fn test_new_rejects_blank_target() {
        let err = Z3950Adapter::new(
            "Bad",
            "   ",
            &SourceSettings::default(),
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_fetch_rejects_oclc_input() {
        let adapter = Z3950Adapter::new(
            "LOC",
            "lx2.loc.gov:210/LCDB",
            &SourceSettings::default(),
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap();
        let err = adapter
            .fetch(&Identifier::oclc("18395"), &WantedFields::new([Field::Lccn]))
            .await
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_missing_client_binary_is_precondition() {
        let settings = SourceSettings {
            yaz_client_path: PathBuf::from("/nonexistent/yaz-client"),
            ..SourceSettings::default()
        };
        let adapter = Z3950Adapter::new(
            "LOC",
            "lx2.loc.gov:210/LCDB",
            &settings,
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap();
        let err = adapter
            .fetch(&Identifier::isbn("9780191513015"), &WantedFields::new([Field::Lccn]))
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(
            adapter.probe_status(&Identifier::isbn("9780191513015")).await,
            ProbeStatus::Unreachable
        );
    }

    #[cfg(unix)]
    mod fake_client {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("yaz-client");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn adapter(client_path: PathBuf, timeout: Duration) -> Z3950Adapter {
            let mut settings = SourceSettings {
                yaz_client_path: client_path,
                ..SourceSettings::default()
            };
            settings.timeouts.insert("Yale".to_string(), timeout);
            Z3950Adapter::new(
                "Yale",
                "z3950.library.yale.edu:7090/voyager",
                &settings,
                Arc::new(RateLimiter::disabled()),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn test_fetch_parses_client_output() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(
                &dir,
                "cat >/dev/null\necho '050  4 $a QA76.73 $b .P98'\necho '079    $a ocm00042'\n\
                 echo 'Innovative Interfaces Inc. Z39.50 SERVER version 1.1' >&2",
            );
            let partial = adapter(script, Duration::from_secs(5))
                .fetch(
                    &Identifier::isbn("9780191513015"),
                    &WantedFields::new([Field::Oclc, Field::Lccn]),
                )
                .await
                .unwrap();
            assert_eq!(
                partial,
                PartialRecord::new().with_lccn("QA76.73 .P98").with_oclc("00042")
            );
        }

        #[tokio::test]
        async fn test_fetch_fails_on_unexpected_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(&dir, "cat >/dev/null\necho 'connection refused' >&2");
            let err = adapter(script, Duration::from_secs(5))
                .fetch(&Identifier::isbn("9780191513015"), &WantedFields::new([Field::Lccn]))
                .await
                .unwrap_err();
            assert!(err.is_transient());
            assert!(err.to_string().contains("connection refused"));
        }

        #[tokio::test]
        async fn test_fetch_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(&dir, "cat >/dev/null\nsleep 5");
            let err = adapter(script, Duration::from_millis(200))
                .fetch(&Identifier::isbn("9780191513015"), &WantedFields::new([Field::Lccn]))
                .await
                .unwrap_err();
            assert!(matches!(err, SourceError::Timeout { .. }));
        }

        #[tokio::test]
        async fn test_probe_reachable_when_client_succeeds() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(&dir, "cat >/dev/null\nexit 0");
            assert_eq!(
                adapter(script, Duration::from_secs(5))
                    .probe_status(&Identifier::isbn("9780191513015"))
                    .await,
                ProbeStatus::Reachable
            );
        }
    }
}
