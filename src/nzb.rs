//! NZB Assembler (F): collects a job's posted articles into a well-formed
//! NZB document.
//!
//! Grounded on `nntp_rs::nzb::Nzb::to_xml` (same `quick_xml::Writer` event
//! sequence); we only write, since postie never needs to read NZBs back.

use crate::types::{FilePostResult, PostResult};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

const NZB_XMLNS: &str = "http://www.newzbin.com/DTD/2003/nzb";
const NZB_DOCTYPE: &str =
    "<!DOCTYPE nzb PUBLIC \"-//newzBin//DTD NZB 1.1//EN\" \"http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd\">";

/// Build the NZB XML document for a job's successfully posted files, and
/// write it to `path`, creating parent directories if needed.
///
/// Files are emitted in ascending file ordinal; each file's segments in
/// ascending part number. Fails if `results` is empty (no file posted
/// anything), matching the Assembler's "zero successful segments" rule
/// scaled up to the whole document.
pub async fn write(path: &Path, results: &[FilePostResult], assembled_at: i64) -> crate::Result<()> {
    let xml = to_xml(results, assembled_at)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| crate::Error::Nzb(format!("failed to create NZB output directory: {e}")))?;
        }
    }

    tokio::fs::write(path, xml)
        .await
        .map_err(|e| crate::Error::Nzb(format!("failed to write NZB to {}: {e}", path.display())))
}

/// Render the NZB XML document for a job's posted files.
///
/// Returns `Error::Nzb` if `results` is empty or any file has zero segments.
pub fn to_xml(results: &[FilePostResult], assembled_at: i64) -> crate::Result<String> {
    if results.is_empty() {
        return Err(crate::Error::Nzb("no files were successfully posted".to_string()));
    }

    let mut files: Vec<&FilePostResult> = results.iter().collect();
    files.sort_by_key(|f| f.file_number);

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut nzb_elem = BytesStart::new("nzb");
    nzb_elem.push_attribute(("xmlns", NZB_XMLNS));
    writer
        .write_event(Event::Start(nzb_elem))
        .map_err(|e| crate::Error::Nzb(e.to_string()))?;

    for file in &files {
        if file.segments.is_empty() {
            return Err(crate::Error::Nzb(format!(
                "file #{} ({}) has zero successful segments",
                file.file_number, file.file_name
            )));
        }
        write_file(&mut writer, file, assembled_at).map_err(|e| crate::Error::Nzb(e.to_string()))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("nzb")))
        .map_err(|e| crate::Error::Nzb(e.to_string()))?;

    let body = writer.into_inner().into_inner();
    let body = String::from_utf8(body).map_err(|e| crate::Error::Nzb(e.to_string()))?;

    let mut document = String::with_capacity(body.len() + 128);
    document.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    document.push_str(NZB_DOCTYPE);
    document.push('\n');
    document.push_str(&body);
    Ok(document)
}

fn write_file(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    file: &FilePostResult,
    assembled_at: i64,
) -> quick_xml::Result<()> {
    let mut segments: Vec<&PostResult> = file.segments.iter().collect();
    segments.sort_by_key(|s| s.part_number);

    let total_bytes: u64 = segments.iter().map(|s| s.bytes).sum();

    let mut file_elem = BytesStart::new("file");
    file_elem.push_attribute(("poster", file.poster.as_str()));
    file_elem.push_attribute(("date", assembled_at.to_string().as_str()));
    file_elem.push_attribute(("subject", file.subject.as_str()));
    file_elem.push_attribute(("bytes", total_bytes.to_string().as_str()));
    file_elem.push_attribute(("number", file.file_number.to_string().as_str()));
    writer.write_event(Event::Start(file_elem))?;

    writer.write_event(Event::Start(BytesStart::new("groups")))?;
    for group in &file.groups {
        writer.write_event(Event::Start(BytesStart::new("group")))?;
        writer.write_event(Event::Text(BytesText::new(group)))?;
        writer.write_event(Event::End(BytesEnd::new("group")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("groups")))?;

    writer.write_event(Event::Start(BytesStart::new("segments")))?;
    for segment in segments {
        let message_id = segment.message_id.trim_start_matches('<').trim_end_matches('>');
        let mut seg_elem = BytesStart::new("segment");
        seg_elem.push_attribute(("bytes", segment.bytes.to_string().as_str()));
        seg_elem.push_attribute(("number", segment.part_number.to_string().as_str()));
        writer.write_event(Event::Start(seg_elem))?;
        writer.write_event(Event::Text(BytesText::new(message_id)))?;
        writer.write_event(Event::End(BytesEnd::new("segment")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("segments")))?;

    writer.write_event(Event::End(BytesEnd::new("file")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(file_number: u32, part_number: u32, bytes: u64, message_id: &str) -> PostResult {
        PostResult {
            file_number,
            part_number,
            message_id: message_id.to_string(),
            provider: "provider-a".to_string(),
            bytes,
            attempts: 1,
        }
    }

    fn file(file_number: u32, segments: Vec<PostResult>) -> FilePostResult {
        FilePostResult {
            file_number,
            file_name: format!("file{file_number}.bin"),
            subject: format!("file{file_number}.bin [1/1]"),
            poster: "u@h".to_string(),
            groups: vec!["alt.bin".to_string()],
            sha256: "deadbeef".to_string(),
            segments,
        }
    }

    #[test]
    fn empty_results_fail() {
        let err = to_xml(&[], 1_700_000_000).unwrap_err();
        assert!(err.to_string().contains("no files"));
    }

    #[test]
    fn file_with_no_segments_fails() {
        let results = vec![file(1, Vec::new())];
        let err = to_xml(&results, 1_700_000_000).unwrap_err();
        assert!(err.to_string().contains("zero successful segments"));
    }

    #[test]
    fn segments_are_sorted_by_part_number_and_ids_unbracketed() {
        let results = vec![file(
            1,
            vec![
                result(1, 2, 100, "<second@example.com>"),
                result(1, 1, 100, "<first@example.com>"),
            ],
        )];

        let xml = to_xml(&results, 1_700_000_000).unwrap();
        let first_pos = xml.find("first@example.com").unwrap();
        let second_pos = xml.find("second@example.com").unwrap();
        assert!(first_pos < second_pos);
        assert!(!xml.contains("<first@example.com>"));
        assert!(xml.contains("number=\"1\""));
        assert!(xml.contains("number=\"2\""));
    }

    #[test]
    fn file_entry_carries_bytes_and_number() {
        let results = vec![file(
            3,
            vec![result(3, 1, 100, "a@example.com"), result(3, 2, 50, "b@example.com")],
        )];
        let xml = to_xml(&results, 1_700_000_000).unwrap();
        assert!(xml.contains("number=\"3\""));
        assert!(xml.contains("bytes=\"150\""));
    }

    #[test]
    fn files_are_sorted_by_ordinal() {
        let results = vec![
            file(2, vec![result(2, 1, 50, "a@example.com")]),
            file(1, vec![result(1, 1, 50, "b@example.com")]),
        ];

        let xml = to_xml(&results, 1_700_000_000).unwrap();
        let pos1 = xml.find("file1.bin").unwrap();
        let pos2 = xml.find("file2.bin").unwrap();
        assert!(pos1 < pos2);
    }

    #[test]
    fn document_has_xml_declaration_and_doctype() {
        let results = vec![file(1, vec![result(1, 1, 50, "a@example.com")])];
        let xml = to_xml(&results, 1_700_000_000).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<!DOCTYPE nzb"));
        assert!(xml.contains(NZB_XMLNS));
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("job.nzb");
        let results = vec![file(1, vec![result(1, 1, 50, "a@example.com")])];

        write(&path, &results, 1_700_000_000).await.unwrap();
        assert!(path.exists());
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("file1.bin"));
    }
}
