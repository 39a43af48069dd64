//! Ogg page scanning used to recognize and capture the identification and
//! comment header pages of an Ogg-Opus stream (RFC 3533 page framing,
//! RFC 7845 §5.2 packet organization). This is the one external
//! collaborator the relay ships a real implementation for, since it is
//! cheap and lets the dispatch pipeline be exercised end to end.
const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const CONTINUATION_FLAG: u8 = 0x01;

#[derive(Debug, Clone)]
pub struct OggPage {
    pub header_type: u8,
    pub page_sequence_number: u32,
    pub raw: Vec<u8>,
}

/// Walk `data` splitting it into consecutive Ogg pages, stopping at the
/// first position that doesn't start with a valid page header. Returned
/// pages are sorted by `page_sequence_number`, matching the upstream
/// decoder's tolerance for out-of-order arrival over UDP.
pub fn split_into_pages(data: &[u8]) -> Vec<OggPage> {
    let mut pages = Vec::new();
    let mut offset = 0usize;

    while offset + 27 <= data.len() {
        let header = &data[offset..offset + 27];
        if &header[0..4] != CAPTURE_PATTERN {
            break;
        }
        let header_type = header[5];
        let page_sequence_number = u32::from_le_bytes(header[18..22].try_into().unwrap());
        let segment_count = header[26] as usize;

        let table_end = offset + 27 + segment_count;
        if table_end > data.len() {
            break;
        }
        let segment_table = &data[offset + 27..table_end];
        let payload_len: usize = segment_table.iter().map(|&b| b as usize).sum();
        let page_size = 27 + segment_count + payload_len;
        if offset + page_size > data.len() {
            break;
        }

        pages.push(OggPage {
            header_type,
            page_sequence_number,
            raw: data[offset..offset + page_size].to_vec(),
        });
        offset += page_size;
    }

    pages.sort_by_key(|p| p.page_sequence_number);
    pages
}

/// The identification header is always the very first page of a logical
/// stream (page_sequence_number 0). Returns `None` on an empty page list
/// instead of panicking.
pub fn extract_id_header_page(pages: &[OggPage]) -> Option<&OggPage> {
    pages.first()
}

/// Comment header pages start at page_sequence_number 1 and continue while
/// the continuation-packet bit is set; the run is discarded if it never
/// terminates cleanly within the given pages.
pub fn extract_comment_header_pages(pages: &[OggPage]) -> Vec<OggPage> {
    let mut started = false;
    let mut completed = false;
    let mut collected = Vec::new();

    for page in pages {
        if !started {
            if page.page_sequence_number == 1 {
                started = true;
                collected.push(page.clone());
            }
        } else if page.header_type & CONTINUATION_FLAG == 0 {
            collected.push(page.clone());
            completed = true;
            break;
        } else {
            collected.push(page.clone());
        }
    }

    if completed {
        collected
    } else {
        Vec::new()
    }
}

/// Scan raw container bytes for the identification and comment header
/// pages. Returns `Some((id_page_bytes, comment_pages_bytes))` only when
/// both are present, matching the all-or-nothing gate used to decide
/// whether a session's audio is decodable yet.
pub fn find_header_pages(data: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let pages = split_into_pages(data);
    let id_page = extract_id_header_page(&pages)?;
    let comment_pages = extract_comment_header_pages(&pages);
    if comment_pages.is_empty() {
        return None;
    }
    let id_bytes = id_page.raw.clone();
    let comment_bytes = comment_pages.into_iter().flat_map(|p| p.raw).collect();
    Some((id_bytes, comment_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_page(seq: u32, header_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut page = Vec::new();
        page.extend_from_slice(CAPTURE_PATTERN);
        page.push(0); // version
        page.push(header_type);
        page.extend_from_slice(&0i64.to_le_bytes()); // granule position
        page.extend_from_slice(&1u32.to_le_bytes()); // serial number
        page.extend_from_slice(&seq.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes()); // crc (unchecked)
        let segments: Vec<u8> = payload
            .chunks(255)
            .map(|c| c.len() as u8)
            .collect();
        page.push(segments.len() as u8);
        page.extend_from_slice(&segments);
        page.extend_from_slice(payload);
        page
    }

    #[test]
    fn finds_id_and_comment_header_pages() {
        let mut data = Vec::new();
        data.extend(make_page(0, 0x02, b"id-header-payload"));
        data.extend(make_page(1, 0x00, b"comment-header-payload"));
        data.extend(make_page(2, 0x00, b"audio-packet-one"));

        let (id, comment) = find_header_pages(&data).expect("headers should be found");
        assert!(id.windows(4).any(|w| w == CAPTURE_PATTERN));
        assert!(!comment.is_empty());
    }

    #[test]
    fn incomplete_comment_header_yields_none() {
        let mut data = Vec::new();
        data.extend(make_page(0, 0x02, b"id-header-payload"));
        data.extend(make_page(1, 0x01, b"comment-header-part-one")); // continuation never closes
        assert!(find_header_pages(&data).is_none());
    }

    #[test]
    fn empty_input_does_not_panic() {
        assert!(find_header_pages(&[]).is_none());
        assert!(extract_id_header_page(&[]).is_none());
    }

    #[test]
    fn pages_are_sorted_by_sequence_number() {
        let mut data = Vec::new();
        data.extend(make_page(1, 0x00, b"second"));
        data.extend(make_page(0, 0x02, b"first"));
        let pages = split_into_pages(&data);
        assert_eq!(pages[0].page_sequence_number, 0);
        assert_eq!(pages[1].page_sequence_number, 1);
    }
}
