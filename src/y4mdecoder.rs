use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{QualityError, Result};
use crate::frame::LumaFrame;

/// Reads the luma plane of every frame in a YUV4MPEG file.
pub struct Y4mDecoder {
    inner: y4m::Decoder<BufReader<File>>,
    done: bool,
}

impl Y4mDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| QualityError::video_open(path, err))?;
        let inner = y4m::Decoder::new(BufReader::new(file))
            .map_err(|err| QualityError::video_open(path, format!("{err:?}")))?;

        Ok(Self { inner, done: false })
    }
}

#[derive(Copy, Clone)]
struct PlaneLayout {
    width: usize,
    height: usize,
    bytes_per_sample: usize,
    bit_depth: usize,
}

fn convert(layout: PlaneLayout, plane: &[u8]) -> Result<LumaFrame> {
    if layout.bytes_per_sample == 1 {
        return LumaFrame::new(layout.width, layout.height, plane.to_vec());
    }

    let shift = layout.bit_depth.saturating_sub(8);

    let data = plane
        .chunks_exact(2)
        .map(|sample| {
            let value = u16::from_le_bytes([
                sample.first().copied().unwrap_or_default(),
                sample.get(1).copied().unwrap_or_default(),
            ]) >> shift;

            u8::try_from(value).unwrap_or(u8::MAX)
        })
        .collect();

    LumaFrame::new(layout.width, layout.height, data)
}

impl Iterator for Y4mDecoder {
    type Item = Result<LumaFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let layout = PlaneLayout {
            width: self.inner.get_width(),
            height: self.inner.get_height(),
            bytes_per_sample: self.inner.get_bytes_per_sample(),
            bit_depth: self.inner.get_bit_depth(),
        };

        match self.inner.read_frame() {
            Ok(frame) => {
                let frame = convert(layout, frame.get_y_plane());
                self.done = frame.is_err();
                Some(frame)
            }
            Err(y4m::Error::EOF) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(QualityError::Decode(format!("{err:?}"))))
            }
        }
    }
}
