//! Report sink (spec §6 "Report format" / "Exit code").
//!
//! Writes every collected race report as one stanza, then the summary
//! line pair (`Cilksan detected <D> distinct races.` / `Cilksan suppressed
//! <S> duplicate race reports.`), to `CILKSAN_OUTPUT_PATH` (stderr by
//! default) in either `text` or `jsonl` form (`CILKSAN_REPORT_FORMAT`).
//! Exit code is unaffected by what's written here (spec §6: "the tool
//! signals findings only through the report stream").

use std::io::{self, Write};

use serde::Serialize;

use crate::config::{OutputSection, ReportFormat};
use crate::report::{NormalizedKind, RaceReport, ReportStore};
use crate::shadow::AccessRecord;
use crate::symbol::{self, Symbolizer};

#[derive(Serialize)]
struct JsonAccess {
    iid: String,
    kind: &'static str,
}

#[derive(Serialize)]
struct JsonReport {
    kind: &'static str,
    address: String,
    first: JsonAccess,
    second: JsonAccess,
    object: Option<String>,
}

#[derive(Serialize)]
struct JsonSummary {
    distinct: u64,
    suppressed: u64,
}

/// Writes every report in `store` to `out`, then the closing summary.
/// `symbolizer` resolves IIDs to source locations where possible; the
/// default [`symbol::NullSymbolizer`] falls back to the IID's hex form.
pub fn write_reports(
    out: &mut dyn Write,
    store: &ReportStore,
    symbolizer: &dyn Symbolizer,
    format: ReportFormat,
) -> io::Result<()> {
    match format {
        ReportFormat::Text => write_text(out, store, symbolizer),
        ReportFormat::Jsonl => write_jsonl(out, store),
    }
}

fn write_text(out: &mut dyn Write, store: &ReportStore, symbolizer: &dyn Symbolizer) -> io::Result<()> {
    for report in store.reports() {
        write_text_stanza(out, report, symbolizer)?;
    }
    writeln!(out, "Cilksan detected {} distinct races.", store.distinct())?;
    writeln!(out, "Cilksan suppressed {} duplicate race reports.", store.suppressed())?;
    Ok(())
}

fn write_text_stanza(out: &mut dyn Write, report: &RaceReport, symbolizer: &dyn Symbolizer) -> io::Result<()> {
    writeln!(out, "Race detected on location {:#x}", report.addr)?;
    write_access_block(out, &report.first, access_label(report.kind, true), symbolizer)?;
    write_access_block(out, &report.second, access_label(report.kind, false), symbolizer)?;
    writeln!(out, "Common calling context")?;
    if let Some(desc) = &report.object_descriptor {
        writeln!(out, "{desc}")?;
    }
    Ok(())
}

fn write_access_block(
    out: &mut dyn Write,
    access: &AccessRecord,
    label: &str,
    symbolizer: &dyn Symbolizer,
) -> io::Result<()> {
    writeln!(out, "* {label} {} {}", access.iid, symbol::describe(symbolizer, access.iid))
}

/// Race reports don't carry which side was the read and which the write
/// past the kind field, so the label order is fixed by `kind`: for `RW`
/// the canonicalized `first` is always the write and `second` the read
/// (spec §3's fixed RW/WR canonicalization); `WW`/`W-FREE`/`R-FREE` have
/// no ordering ambiguity left by the time they reach the report store.
fn access_label(kind: NormalizedKind, is_first: bool) -> &'static str {
    match (kind, is_first) {
        (NormalizedKind::ReadWrite, true) => "Write",
        (NormalizedKind::ReadWrite, false) => "Read",
        (NormalizedKind::WriteWrite, _) => "Write",
        (NormalizedKind::WriteFree, true) => "Write",
        (NormalizedKind::WriteFree, false) => "Free",
        (NormalizedKind::ReadFree, true) => "Read",
        (NormalizedKind::ReadFree, false) => "Free",
    }
}

fn write_jsonl(out: &mut dyn Write, store: &ReportStore) -> io::Result<()> {
    for report in store.reports() {
        let json = JsonReport {
            kind: kind_str(report.kind),
            address: format!("{:#x}", report.addr),
            first: JsonAccess { iid: report.first.iid.to_string(), kind: access_label(report.kind, true) },
            second: JsonAccess { iid: report.second.iid.to_string(), kind: access_label(report.kind, false) },
            object: report.object_descriptor.clone(),
        };
        let line = serde_json::to_string(&json)?;
        writeln!(out, "{line}")?;
    }
    let summary = JsonSummary { distinct: store.distinct(), suppressed: store.suppressed() };
    writeln!(out, "{}", serde_json::to_string(&summary)?)
}

fn kind_str(kind: NormalizedKind) -> &'static str {
    match kind {
        NormalizedKind::ReadWrite => "RW",
        NormalizedKind::WriteWrite => "WW",
        NormalizedKind::WriteFree => "W-FREE",
        NormalizedKind::ReadFree => "R-FREE",
    }
}

/// Opens the destination named by `section.path`, or stderr when unset,
/// exactly as `CILKSAN_OUTPUT_PATH`'s absence means stderr (spec §6).
pub fn open_destination(section: &OutputSection) -> io::Result<Box<dyn Write>> {
    match &section.path {
        Some(path) => Ok(Box::new(std::fs::File::create(path)?)),
        None => Ok(Box::new(io::stderr())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsu::Dsu;
    use crate::lockset::Lockset;
    use crate::shadow::{RaceHit, RaceKind};
    use crate::symbol::NullSymbolizer;
    use detsan_abi::Iid;

    fn rec(iid: u32, dsu: &mut Dsu) -> AccessRecord {
        AccessRecord { iid: Iid(iid), bid: dsu.make(), lockset: Lockset::empty() }
    }

    #[test]
    fn text_output_includes_stanza_and_summary() {
        let mut dsu = Dsu::new();
        let mut store = ReportStore::new();
        let hit =
            RaceHit { kind: RaceKind::Rw, addr: 0x1000, prior: rec(1, &mut dsu), current: rec(2, &mut dsu) };
        store.submit(&hit, &[], Some("Heap object buf".to_string()));

        let mut buf = Vec::new();
        write_reports(&mut buf, &store, &NullSymbolizer, ReportFormat::Text).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Race detected on location 0x1000"));
        assert!(text.contains("Heap object buf"));
        assert!(text.contains("Cilksan detected 1 distinct races."));
        assert!(text.contains("Cilksan suppressed 0 duplicate race reports."));
    }

    #[test]
    fn jsonl_output_is_one_object_per_line_plus_summary() {
        let mut dsu = Dsu::new();
        let mut store = ReportStore::new();
        let hit =
            RaceHit { kind: RaceKind::Ww, addr: 0x2000, prior: rec(1, &mut dsu), current: rec(2, &mut dsu) };
        store.submit(&hit, &[], None);

        let mut buf = Vec::new();
        write_reports(&mut buf, &store, &NullSymbolizer, ReportFormat::Jsonl).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"WW\""));
        assert!(lines[1].contains("\"distinct\":1"));
    }
}
