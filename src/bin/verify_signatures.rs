//! Signature verification binary.
//!
//! Re-checks every signature in one or more PDF files: the ByteRange, the
//! message digest and the CMS signature over the signed attributes.
//!
//! Usage: `verify_signatures [--json] <file.pdf>...`
//!
//! Exits with status 1 when any signature fails or a file cannot be read.

use pdf_seal::{SignatureVerifier, VerifiedSignature};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;

/// Result for one signature
#[derive(Debug, Clone, Serialize)]
struct SignatureReport {
    field: String,
    byte_range: [usize; 4],
    covered_len: usize,
    digest_matches: bool,
    signature_valid: bool,
    signer: Option<String>,
    signing_time: Option<String>,
    messages: Vec<String>,
}

/// Result for one file
#[derive(Debug, Clone, Serialize)]
struct FileReport {
    path: String,
    file_size: usize,
    signatures: Vec<SignatureReport>,
    error: Option<String>,
}

impl From<&VerifiedSignature> for SignatureReport {
    fn from(sig: &VerifiedSignature) -> Self {
        Self {
            field: sig.field_name.clone(),
            byte_range: sig.byte_range,
            covered_len: sig.covered_len,
            digest_matches: sig.digest_matches,
            signature_valid: sig.signature_valid,
            signer: sig.signer_cn.clone(),
            signing_time: sig.signing_time.map(|t| t.to_rfc3339()),
            messages: sig.messages.clone(),
        }
    }
}

fn check_file(path: &Path) -> (FileReport, bool) {
    let mut report = FileReport {
        path: path.display().to_string(),
        file_size: 0,
        signatures: Vec::new(),
        error: None,
    };

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            report.error = Some(e.to_string());
            return (report, false);
        },
    };
    report.file_size = data.len();

    match SignatureVerifier::verify_all(&data) {
        Ok(signatures) => {
            let ok = signatures.iter().all(VerifiedSignature::is_valid);
            report.signatures = signatures.iter().map(SignatureReport::from).collect();
            (report, ok)
        },
        Err(e) => {
            report.error = Some(e.to_string());
            (report, false)
        },
    }
}

fn print_report(report: &FileReport) {
    println!("{} ({} bytes)", report.path, report.file_size);
    if let Some(error) = &report.error {
        println!("  error: {}", error);
        return;
    }
    if report.signatures.is_empty() {
        println!("  no signatures");
        return;
    }
    for sig in &report.signatures {
        let status = if sig.digest_matches && sig.signature_valid && sig.messages.is_empty() {
            "VALID"
        } else {
            "INVALID"
        };
        println!("  {} [{}]", sig.field, status);
        println!(
            "    range:     [{} {} {} {}] ({} of {} bytes)",
            sig.byte_range[0],
            sig.byte_range[1],
            sig.byte_range[2],
            sig.byte_range[3],
            sig.covered_len,
            report.file_size
        );
        println!("    digest:    {}", if sig.digest_matches { "ok" } else { "mismatch" });
        println!("    signature: {}", if sig.signature_valid { "ok" } else { "bad" });
        if let Some(signer) = &sig.signer {
            println!("    signer:    {}", signer);
        }
        if let Some(time) = &sig.signing_time {
            println!("    signed at: {}", time);
        }
        for message in &sig.messages {
            println!("    ! {}", message);
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let mut json = false;
    let mut paths = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            _ => paths.push(arg),
        }
    }
    if paths.is_empty() {
        eprintln!("Usage: verify_signatures [--json] <file.pdf>...");
        return ExitCode::from(2);
    }

    let mut all_ok = true;
    let mut reports = Vec::with_capacity(paths.len());
    for path in &paths {
        let (report, ok) = check_file(Path::new(path));
        all_ok &= ok;
        if !json {
            print_report(&report);
        }
        reports.push(report);
    }

    if json {
        match serde_json::to_string_pretty(&reports) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Failed to encode report: {}", e);
                return ExitCode::FAILURE;
            },
        }
    }

    if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
