//! Record file info and port listing command implementations.

use anyhow::Result;
use console::style;
use rdulink::{DownloadSummary, list_ports};
use std::path::Path;

use crate::config::Config;
use crate::image::LoadedImage;

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = list_ports()?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": detected,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }

    Ok(())
}

fn segments_json(image: &LoadedImage) -> Vec<serde_json::Value> {
    image
        .segments
        .iter()
        .map(|&(start, end)| {
            serde_json::json!({
                "start": start,
                "end": end,
                "len": end - start + 1,
            })
        })
        .collect()
}

fn info_json(image: &LoadedImage, config: &Config) -> serde_json::Value {
    let s: &DownloadSummary = &image.summary;
    serde_json::json!({
        "ok": true,
        "data": {
            "format": image.format.map(|f| f.name()),
            "base": config.image_base(),
            "records": s.records,
            "bytes": s.bytes,
            "segments": segments_json(image),
            "comments": image.comments,
            "format_errors": s.format_errors,
            "checksum_errors": s.checksum_errors,
            "terminated": s.terminated,
            "address_extensions": image.address_extensions,
            "faults": {
                "flags": s.faults.flags.bits(),
                "first_fault": s.faults.first_fault,
            },
        }
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(config: &Config, file: &Path, json: bool) -> Result<()> {
    let image = LoadedImage::load(file, config.image_base(), config.image_size())?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info_json(&image, config))?
        );
        return Ok(());
    }

    let s = &image.summary;
    eprintln!(
        "{} {}",
        style("📦").cyan(),
        style(file.display()).bold()
    );
    eprintln!(
        "  Format:   {}",
        image.format.map_or("unknown", |f| f.name())
    );
    eprintln!("  Records:  {} ({} data bytes)", s.records, s.bytes);
    eprintln!(
        "  Ends with terminator: {}",
        if s.terminated { style("yes").green() } else { style("no").yellow() }
    );

    if !image.segments.is_empty() {
        eprintln!("\n{}", style("Segments").bold().underlined());
        for &(start, end) in &image.segments {
            eprintln!(
                "  {} 0x{start:04X}..=0x{end:04X} ({} bytes)",
                style("•").green(),
                end - start + 1
            );
        }
    }

    if !image.comments.is_empty() {
        eprintln!("\n{}", style("Comments").bold().underlined());
        for comment in &image.comments {
            eprintln!("  {} {}", style("•").green(), style(comment).dim());
        }
    }

    if s.format_errors > 0 || s.checksum_errors > 0 {
        eprintln!(
            "\n{} {} format error(s), {} checksum error(s)",
            style("⚠").yellow(),
            s.format_errors,
            s.checksum_errors
        );
    }
    if image.address_extensions > 0 {
        eprintln!(
            "{} {} address extension record(s) ignored; data above 64K is not supported",
            style("⚠").yellow(),
            image.address_extensions
        );
    }
    if let Some(address) = s.faults.first_fault {
        eprintln!(
            "{} data outside the image, first at 0x{address:X} ({:?})",
            style("⚠").yellow(),
            s.faults.flags
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_json_shape() {
        let image = LoadedImage::parse(
            "S00600006D6174B7\nS1070100DEADBEEFBF\nS9030000FC\n",
            0,
            0x1000,
        );
        let value = info_json(&image, &Config::default());
        let data = &value["data"];
        assert_eq!(value["ok"], true);
        assert_eq!(data["format"], "S-record");
        assert_eq!(data["records"], 1);
        assert_eq!(data["segments"][0]["start"], 0x100);
        assert_eq!(data["segments"][0]["len"], 4);
        assert_eq!(data["comments"][0], "mat");
        assert_eq!(data["terminated"], true);
        assert_eq!(data["address_extensions"], 0);
        assert!(data["faults"]["first_fault"].is_null());
    }
}
