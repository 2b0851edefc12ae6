// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ESC/POS rendering for receipt printers.
//
// Images are reduced to 1-bit and emitted with the `GS v 0` raster bit-image
// command (normal density), one bit per dot, MSB = leftmost dot, 1 = black.
// The print head of an 80 mm printer is 576 dots wide; wider images are
// scaled down to fit.

use image::DynamicImage;
use image::imageops::FilterType;
use tracing::{debug, instrument};

use printflow_core::PayloadFormat;
use printflow_core::error::{PrintflowError, Result};

/// `ESC @`: reset the printer to its power-on state.
pub const INIT: [u8; 2] = [0x1B, 0x40];

/// `GS V 0`: full paper cut.
pub const CUT: [u8; 3] = [0x1D, 0x56, 0x00];

/// `GS v 0 m` with m = 0 (normal density); followed by xL xH yL yH.
pub const RASTER_START: [u8; 4] = [0x1D, 0x76, 0x30, 0x00];

/// Widest raster, in dots, accepted by an 80 mm print head.
pub const MAX_DOTS: u32 = 576;

/// Luma values below this print black.
const THRESHOLD: u8 = 128;

/// Leading bytes of every PDF document.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Build the spooler byte stream for a payload.
///
/// `cut` appends [`CUT`] for every format except PDF, which the OS filters
/// and cannot carry printer commands.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn render(format: PayloadFormat, bytes: &[u8], cut: bool) -> Result<Vec<u8>> {
    let mut out = match format {
        PayloadFormat::Raw | PayloadFormat::EscPos | PayloadFormat::Raster => bytes.to_vec(),
        PayloadFormat::Image => {
            let raster = RasterImage::from_encoded(bytes)?;
            let mut out = Vec::with_capacity(INIT.len() + raster.command_len() + CUT.len());
            out.extend_from_slice(&INIT);
            raster.write_command(&mut out);
            out
        }
        PayloadFormat::Pdf => {
            check_pdf(bytes)?;
            return Ok(bytes.to_vec());
        }
    };

    if cut && format.supports_cut() {
        out.extend_from_slice(&CUT);
    }
    Ok(out)
}

/// Reject PDF payloads that do not start with the `%PDF-` header.
pub fn check_pdf(bytes: &[u8]) -> Result<()> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err(PrintflowError::InvalidRequest(
            "payload declared as pdf does not start with %PDF-".into(),
        ))
    }
}

/// A packed 1-bit raster ready for `GS v 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    /// Bytes per row (dots / 8, rounded up).
    pub width_bytes: u16,
    /// Rows.
    pub height: u16,
    /// `width_bytes * height` bytes, row-major.
    pub data: Vec<u8>,
}

impl RasterImage {
    /// Decode a PNG/JPEG/BMP/GIF and convert it.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| PrintflowError::InvalidRequest(format!("undecodable image: {e}")))?;
        Self::from_image(&img)
    }

    /// Grayscale, scale to at most [`MAX_DOTS`] wide, threshold, pack.
    pub fn from_image(img: &DynamicImage) -> Result<Self> {
        let mut gray = img.grayscale();
        if gray.width() > MAX_DOTS {
            let height = (u64::from(gray.height()) * u64::from(MAX_DOTS) / u64::from(gray.width()))
                .max(1) as u32;
            gray = gray.resize_exact(MAX_DOTS, height, FilterType::Lanczos3);
        }
        let luma = gray.to_luma8();
        let (width, height) = luma.dimensions();

        if width == 0 || height == 0 {
            return Err(PrintflowError::InvalidRequest("image has no pixels".into()));
        }
        let height = u16::try_from(height).map_err(|_| {
            PrintflowError::InvalidRequest(format!("image too tall for a raster command ({height} rows)"))
        })?;

        // MAX_DOTS keeps this well inside u16.
        let width_bytes = width.div_ceil(8) as usize;
        let mut data = vec![0u8; width_bytes * usize::from(height)];
        for (x, y, px) in luma.enumerate_pixels() {
            if px.0[0] < THRESHOLD {
                data[y as usize * width_bytes + x as usize / 8] |= 0x80 >> (x % 8);
            }
        }

        debug!(width, height, width_bytes, "image rasterised");
        Ok(Self {
            width_bytes: width_bytes as u16,
            height,
            data,
        })
    }

    /// Length of the encoded command including its header.
    pub fn command_len(&self) -> usize {
        RASTER_START.len() + 4 + self.data.len()
    }

    /// Append the `GS v 0` command and raster data to `out`.
    pub fn write_command(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&RASTER_START);
        out.extend_from_slice(&self.width_bytes.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.data);
    }
}
