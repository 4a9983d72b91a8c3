//! Helper script templates
//!
//! A running executable cannot replace itself on every OS, so the swap is
//! performed by a small script that waits for this process to exit. The
//! scripts only wait, stage, swap with rollback, relaunch and clean up.

use super::{ApplyPlan, HelperTiming};
use std::path::Path;

const POSIX_SWAP: &str = r#"#!/bin/bash
# CodeSwitch update helper
set -u

TARGET={{TARGET}}
PAYLOAD={{PAYLOAD}}
PARENT_PID={{PID}}
MAX_WAIT_SECS={{MAX_WAIT_SECS}}
SWAP_RETRIES={{SWAP_RETRIES}}
RETRY_DELAY={{RETRY_DELAY}}
CLEANUP_DELAY={{CLEANUP_DELAY}}
STAGING="${TARGET}.new"
BACKUP="${TARGET}.old"

waited=0
while kill -0 "$PARENT_PID" 2>/dev/null; do
    if [ "$waited" -ge $((MAX_WAIT_SECS * 2)) ]; then
        echo "Timed out waiting for process $PARENT_PID to exit" >&2
        exit 1
    fi
    sleep 0.5
    waited=$((waited + 1))
done

rm -rf "$STAGING"
{{STAGE}}
{{PREPARE}}

swapped=0
i=0
while [ "$i" -lt "$SWAP_RETRIES" ]; do
    rm -rf "$BACKUP"
    if mv -f "$TARGET" "$BACKUP" 2>/dev/null; then
        if mv -f "$STAGING" "$TARGET" 2>/dev/null; then
            swapped=1
            break
        fi
        mv -f "$BACKUP" "$TARGET" 2>/dev/null
    fi
    sleep "$RETRY_DELAY"
    i=$((i + 1))
done

if [ "$swapped" -ne 1 ]; then
    echo "Failed to replace $TARGET, keeping the current version" >&2
    if [ ! -e "$TARGET" ] && [ -e "$BACKUP" ]; then
        mv -f "$BACKUP" "$TARGET"
    fi
    rm -rf "$STAGING"
    exit 1
fi

{{RELAUNCH}}
sleep "$CLEANUP_DELAY"
rm -rf "$BACKUP"
rm -rf "$PAYLOAD"
"#;

const WINDOWS_SWAP: &str = r#"# CodeSwitch update helper
$ErrorActionPreference = 'Stop'

$ParentPid = {{PID}}
$Target = {{TARGET}}
$Payload = {{PAYLOAD}}
$Staging = "$Target.new"
$Backup = "$Target.old"
$MaxWaitSecs = {{MAX_WAIT_SECS}}
$SwapRetries = {{SWAP_RETRIES}}
$RetryDelayMs = {{RETRY_DELAY_MS}}
$CleanupDelaySecs = {{CLEANUP_DELAY}}

$deadline = (Get-Date).AddSeconds($MaxWaitSecs)
while (Get-Process -Id $ParentPid -ErrorAction SilentlyContinue) {
    if ((Get-Date) -gt $deadline) {
        Write-Error "Timed out waiting for process $ParentPid to exit"
        exit 1
    }
    Start-Sleep -Milliseconds 500
}

Copy-Item -LiteralPath $Payload -Destination $Staging -Force

$swapped = $false
for ($i = 0; $i -lt $SwapRetries; $i++) {
    try {
        if (Test-Path -LiteralPath $Backup) { Remove-Item -LiteralPath $Backup -Force }
        Move-Item -LiteralPath $Target -Destination $Backup -Force
        try {
            Move-Item -LiteralPath $Staging -Destination $Target -Force
            $swapped = $true
            break
        } catch {
            Move-Item -LiteralPath $Backup -Destination $Target -Force
        }
    } catch {}
    Start-Sleep -Milliseconds $RetryDelayMs
}

if (-not $swapped) {
    if (-not (Test-Path -LiteralPath $Target) -and (Test-Path -LiteralPath $Backup)) {
        Move-Item -LiteralPath $Backup -Destination $Target -Force
    }
    Remove-Item -LiteralPath $Staging -Force -ErrorAction SilentlyContinue
    exit 1
}

Start-Process -FilePath $Target
Start-Sleep -Seconds $CleanupDelaySecs
Remove-Item -LiteralPath $Backup -Force -ErrorAction SilentlyContinue
Remove-Item -LiteralPath $Payload -Force -ErrorAction SilentlyContinue
"#;

const WINDOWS_INSTALLER: &str = r#"# CodeSwitch update helper
$ErrorActionPreference = 'Stop'

$ParentPid = {{PID}}
$Target = {{TARGET}}
$Installer = {{PAYLOAD}}
$MaxWaitSecs = {{MAX_WAIT_SECS}}
$CleanupDelaySecs = {{CLEANUP_DELAY}}

$deadline = (Get-Date).AddSeconds($MaxWaitSecs)
while (Get-Process -Id $ParentPid -ErrorAction SilentlyContinue) {
    if ((Get-Date) -gt $deadline) {
        Write-Error "Timed out waiting for process $ParentPid to exit"
        exit 1
    }
    Start-Sleep -Milliseconds 500
}

$proc = Start-Process -FilePath $Installer -ArgumentList '/S' -Wait -PassThru
if ($proc.ExitCode -ne 0) {
    exit $proc.ExitCode
}

if (Test-Path -LiteralPath $Target) {
    Start-Process -FilePath $Target
}
Start-Sleep -Seconds $CleanupDelaySecs
Remove-Item -LiteralPath $Installer -Force -ErrorAction SilentlyContinue
"#;

/// bash swap helper; `macos` switches staging to `ditto` and relaunch to `open`
pub fn render_posix_swap(plan: &ApplyPlan, macos: bool) -> String {
    let (stage, prepare, relaunch) = if macos {
        (
            r#"ditto "$PAYLOAD" "$STAGING" || exit 1"#,
            r#"xattr -dr com.apple.quarantine "$STAGING" 2>/dev/null || true"#,
            r#"open "$TARGET""#,
        )
    } else {
        (
            r#"cp -f "$PAYLOAD" "$STAGING" || exit 1"#,
            r#"chmod +x "$STAGING""#,
            r#"nohup "$TARGET" >/dev/null 2>&1 &"#,
        )
    };

    let mut vars = common_vars(plan, sh_quote);
    vars.extend([
        ("RETRY_DELAY", seconds_fraction(plan.timing.swap_retry_delay_ms)),
        ("STAGE", stage.to_string()),
        ("PREPARE", prepare.to_string()),
        ("RELAUNCH", relaunch.to_string()),
    ]);
    fill(POSIX_SWAP, &vars)
}

/// PowerShell swap helper
pub fn render_windows_swap(plan: &ApplyPlan) -> String {
    let mut vars = common_vars(plan, ps_quote);
    vars.push(("RETRY_DELAY_MS", plan.timing.swap_retry_delay_ms.to_string()));
    fill(WINDOWS_SWAP, &vars)
}

/// PowerShell helper that runs the installer silently
pub fn render_windows_installer(plan: &ApplyPlan) -> String {
    fill(WINDOWS_INSTALLER, &common_vars(plan, ps_quote))
}

fn common_vars(plan: &ApplyPlan, quote: fn(&Path) -> String) -> Vec<(&'static str, String)> {
    let HelperTiming {
        parent_exit_timeout_secs,
        swap_retries,
        cleanup_delay_secs,
        ..
    } = plan.timing;
    vec![
        ("PID", plan.pid.to_string()),
        ("TARGET", quote(&plan.target)),
        ("PAYLOAD", quote(&plan.payload)),
        ("MAX_WAIT_SECS", parent_exit_timeout_secs.to_string()),
        ("SWAP_RETRIES", swap_retries.to_string()),
        ("CLEANUP_DELAY", cleanup_delay_secs.to_string()),
    ]
}

/// Single-quote for bash
pub fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Single-quote for PowerShell
pub fn ps_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

fn seconds_fraction(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Substitute `{{NAME}}` placeholders in one pass, so substituted values are
/// never scanned again.
fn fill(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = &after[..end];
        match vars.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push_str("{{");
                out.push_str(key);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
