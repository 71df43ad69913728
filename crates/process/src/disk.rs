use std::path::Path;

/// Disk usage of `path` in bytes as reported by `du -sk`.
///
/// Best effort: any failure is logged and yields `None`.
pub async fn disk_usage(path: &Path) -> Option<u64> {
	let output = match tokio::process::Command::new("du").arg("-sk").arg(path).output().await {
		Ok(output) => output,
		Err(err) => {
			tracing::debug!(path = %path.display(), error = %err, "disk_usage.spawn_failed");
			return None;
		}
	};
	if !output.status.success() {
		tracing::debug!(path = %path.display(), status = ?output.status, "disk_usage.failed");
		return None;
	}
	let stdout = String::from_utf8_lossy(&output.stdout);
	let kib = stdout.split_whitespace().next()?.parse::<u64>().ok()?;
	Some(kib.saturating_mul(1024))
}
