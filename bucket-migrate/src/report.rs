//! Human-readable rendering of run summaries and stored transfer records.

use std::fmt::Write;

use bucket_migrate_core::fingerprint::TransferRecord;
use bucket_migrate_core::migrate::TransferSummary;

pub fn render_summary(summary: &TransferSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Migration summary");
    let _ = writeln!(out, "  Total processed: {}", summary.total_processed());
    let _ = writeln!(out, "  Transferred:     {}", summary.transferred.len());
    let _ = writeln!(out, "  Skipped:         {}", summary.skipped.len());
    let _ = writeln!(out, "  Failed:          {}", summary.failed.len());
    for failed in &summary.failed {
        let _ = writeln!(out, "    - {}: {}", failed.source_path, failed.error);
    }
    if !summary.unrecorded.is_empty() {
        let _ = writeln!(
            out,
            "  Copied but not recorded (will be copied again next run): {}",
            summary.unrecorded.len()
        );
        for entry in &summary.unrecorded {
            let _ = writeln!(out, "    - {}: {}", entry.source_path, entry.error);
        }
    }
    let _ = writeln!(
        out,
        "  Destination:     {} ({})",
        summary.destination_info.name, summary.destination_info.url
    );
    if summary.cancelled {
        let _ = writeln!(out, "  Cancelled before all objects were started.");
    }
    out
}

pub fn render_records(records: &[TransferRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let _ = writeln!(
            out,
            "{}  {} -> {}/{}  {} bytes  {}",
            record.fingerprint,
            record.source_path,
            record.destination_bucket,
            record.destination_path,
            record.size,
            record.uploaded_at.to_rfc3339()
        );
    }
    let _ = writeln!(out, "{} transfer record(s)", records.len());
    out
}
