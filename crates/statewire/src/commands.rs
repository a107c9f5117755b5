//! Subcommand implementations, independent of argument parsing

use crate::jsonl::write_line;
use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;
use statewire_state::{
    ClientStateCache, CodecRegistry, CompressionLevel, CompressionMethod, Envelope,
    MessageOptimizer, NetworkCodec, StateError, SyncConfig,
};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings for [`encode`]
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub client_id: Option<String>,
    /// Overrides the configured default method
    pub method: Option<CompressionMethod>,
    /// Overrides the configured default level
    pub level: Option<CompressionLevel>,
    /// Run snapshots through the message optimizer first
    pub optimize: bool,
    /// Send all snapshots as one batch envelope
    pub batch: bool,
}

/// Totals reported by [`encode`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeSummary {
    pub messages: usize,
    pub deltas: usize,
    pub original_bytes: usize,
    pub compressed_bytes: usize,
}

/// Encode snapshots in order, writing one envelope per line
pub fn encode(
    config: &SyncConfig,
    snapshots: &[Value],
    options: &EncodeOptions,
    out: &mut dyn Write,
) -> Result<EncodeSummary> {
    let codec = NetworkCodec::new(Arc::new(ClientStateCache::new()), config);
    let optimizer = MessageOptimizer::new(config);
    let method = options.method.unwrap_or(config.default_method);
    let level = options.level.unwrap_or(config.default_level);
    let client_id = options.client_id.as_deref();

    if method == CompressionMethod::Delta && client_id.is_none() {
        bail!("DELTA encoding needs --client");
    }

    let prepared: Vec<Value> = if options.optimize {
        snapshots.iter().map(|s| optimizer.optimize(s)).collect()
    } else {
        snapshots.to_vec()
    };

    let envelopes = if options.batch {
        vec![codec.batch_compress_with(&prepared, method, level, client_id)?]
    } else {
        prepared
            .iter()
            .map(|snapshot| codec.encode_with(snapshot, method, level, client_id))
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut summary = EncodeSummary::default();
    for envelope in &envelopes {
        summary.messages += 1;
        summary.deltas += usize::from(envelope.metadata.delta);
        summary.original_bytes += envelope.metadata.original_size;
        summary.compressed_bytes += envelope.metadata.compressed_size;
        write_line(out, envelope)?;
    }
    out.flush()?;

    info!(
        "Encoded {} snapshots into {} envelopes ({} deltas): {} -> {} bytes",
        snapshots.len(),
        summary.messages,
        summary.deltas,
        summary.original_bytes,
        summary.compressed_bytes
    );
    Ok(summary)
}

/// Decode envelopes in order, writing one snapshot per line.
///
/// Batch envelopes expand into their messages. Returns the number of
/// snapshots written.
pub fn decode(
    config: &SyncConfig,
    envelopes: &[Envelope],
    client_id: Option<&str>,
    deoptimize: bool,
    out: &mut dyn Write,
) -> Result<usize> {
    let codec = NetworkCodec::new(Arc::new(ClientStateCache::new()), config);
    let optimizer = MessageOptimizer::new(config);

    let mut written = 0;
    for (index, envelope) in envelopes.iter().enumerate() {
        let messages = if envelope.batch {
            codec.batch_decompress(envelope, client_id)?
        } else {
            vec![codec.decode_from_network(envelope, client_id)?]
        };
        debug!("Envelope {} decoded into {} messages", index, messages.len());

        for message in messages {
            let message = if deoptimize {
                optimizer.deoptimize(&message)?
            } else {
                message
            };
            write_line(out, &message)?;
            written += 1;
        }
    }
    out.flush()?;
    Ok(written)
}

/// Size of a snapshot stream under one method
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodecReport {
    pub method: CompressionMethod,
    pub original_bytes: usize,
    pub compressed_bytes: usize,
    pub ratio: f64,
}

/// Encode the stream with every available method and report the sizes.
///
/// Stateful methods see the snapshots as one client's stream, so their
/// totals include the first full snapshot and the deltas after it. DELTA is
/// left out of the report when a snapshot is not a mapping.
pub fn compare(
    config: &SyncConfig,
    snapshots: &[Value],
    level: CompressionLevel,
) -> Result<(Vec<CodecReport>, CompressionMethod)> {
    let probe = CodecRegistry::new(Arc::new(ClientStateCache::new()), config);
    let client_id = Some("compare");

    let mut reports = Vec::new();
    'methods: for method in probe.available_methods() {
        // Fresh baselines per method
        let registry = CodecRegistry::new(Arc::new(ClientStateCache::new()), config);
        let mut original_bytes = 0;
        let mut compressed_bytes = 0;
        for snapshot in snapshots {
            let (_, metadata) = match registry.compress(snapshot, method, level, client_id) {
                Ok(encoded) => encoded,
                Err(StateError::InvalidSnapshot(reason)) => {
                    warn!("Skipping {}: {}", method, reason);
                    continue 'methods;
                }
                Err(e) => return Err(e.into()),
            };
            original_bytes += metadata.original_size;
            compressed_bytes += metadata.compressed_size;
        }
        reports.push(CodecReport {
            method,
            original_bytes,
            compressed_bytes,
            ratio: if compressed_bytes > 0 {
                original_bytes as f64 / compressed_bytes as f64
            } else {
                1.0
            },
        });
    }

    let average = match snapshots.len() {
        0 => 0,
        n => reports.first().map(|r| r.original_bytes / n).unwrap_or(0),
    };
    Ok((reports, probe.optimal_method(average)))
}

/// Render [`compare`] results as a text table
pub fn write_report(
    reports: &[CodecReport],
    suggested: CompressionMethod,
    out: &mut dyn Write,
) -> Result<()> {
    writeln!(out, "{:<8} {:>12} {:>12} {:>8}", "METHOD", "ORIGINAL", "COMPRESSED", "RATIO")?;
    for report in reports {
        writeln!(
            out,
            "{:<8} {:>12} {:>12} {:>8.2}",
            report.method.as_str(),
            report.original_bytes,
            report.compressed_bytes,
            report.ratio
        )?;
    }
    writeln!(out, "suggested for average size: {suggested}")?;
    out.flush()?;
    Ok(())
}
