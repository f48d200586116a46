use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Frames larger than this are assumed to be garbage and dropped.
const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Cuts a concatenated MJPEG byte stream into individual JPEG images.
#[derive(Default)]
pub struct JpegSplitter {
    buffer: BytesMut,
}

impl JpegSplitter {
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn next_frame(&mut self) -> Option<Bytes> {
        let Some(start) = find_marker(&self.buffer, 0, SOI) else {
            // a trailing 0xFF may be the first half of the next SOI
            let keep = usize::from(self.buffer.last() == Some(&0xFF));
            let skip = self.buffer.len() - keep;
            self.buffer.advance(skip);
            return None;
        };
        self.buffer.advance(start);

        match find_marker(&self.buffer, SOI.len(), EOI) {
            Some(end) => Some(self.buffer.split_to(end + EOI.len()).freeze()),
            None => {
                if self.buffer.len() > MAX_FRAME_SIZE {
                    self.buffer.clear();
                }
                None
            }
        }
    }
}

fn find_marker(buffer: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|position| position + from)
}

/// One multipart part carrying `frame`, boundary line included.
pub fn part(frame: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(frame);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        [&SOI[..], body, &EOI[..]].concat()
    }

    #[test]
    fn splits_concatenated_frames() {
        let mut splitter = JpegSplitter::default();
        let first = jpeg(b"one");
        let second = jpeg(b"two");
        splitter.buffer_mut().put_slice(&first);
        splitter.buffer_mut().put_slice(&second);

        assert_eq!(splitter.next_frame().unwrap(), first);
        assert_eq!(splitter.next_frame().unwrap(), second);
        assert!(splitter.next_frame().is_none());
    }

    #[test]
    fn waits_for_the_rest_of_a_frame() {
        let mut splitter = JpegSplitter::default();
        let frame = jpeg(b"\x00\x01\xFF\x00payload");
        let (head, tail) = frame.split_at(5);

        splitter.buffer_mut().put_slice(head);
        assert!(splitter.next_frame().is_none());
        splitter.buffer_mut().put_slice(tail);
        assert_eq!(splitter.next_frame().unwrap(), frame);
    }

    #[test]
    fn skips_garbage_between_frames() {
        let mut splitter = JpegSplitter::default();
        let frame = jpeg(b"x");
        splitter.buffer_mut().put_slice(b"noise\xFF");
        assert!(splitter.next_frame().is_none());
        splitter.buffer_mut().put_slice(&frame[1..]);
        assert_eq!(splitter.next_frame().unwrap(), frame);
    }

    #[test]
    fn part_is_boundary_delimited() {
        let part = part(b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n"
        );
    }
}
