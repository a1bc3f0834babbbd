use anyhow::Error;
use base64::Engine;
use opencv::core::{Mat, MatTraitConst, MatTraitConstManual, Size, Vector, VectorToVec};
use opencv::imgcodecs::{imdecode, IMREAD_COLOR, IMREAD_UNCHANGED};
use opencv::imgproc::{cvt_color, resize, COLOR_BGR2BGRA, COLOR_GRAY2BGRA, INTER_AREA};

/// Decoded, alpha-normalized asset pixels in BGRA row-major order.
///
/// Kept as a plain byte buffer so entries can be shared across sessions
/// behind an `Arc` without touching OpenCV handles.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetBuffer {
    width: i32,
    height: i32,
    data: Vec<u8>,
}

impl AssetBuffer {
    /// Wraps a continuous 4-channel matrix into an owned buffer.
    pub fn from_mat(mat: &Mat) -> Result<AssetBuffer, Error> {
        if mat.channels() != 4 {
            return Err(Error::msg("asset matrix must have 4 channels"));
        }
        let owned;
        let mat = if mat.is_continuous() {
            mat
        } else {
            owned = mat.try_clone()?;
            &owned
        };
        Ok(AssetBuffer {
            width: mat.cols(),
            height: mat.rows(),
            data: mat.data_bytes()?.to_vec(),
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Rebuilds an owned BGRA matrix from the buffer.
    pub fn to_mat(&self) -> Result<Mat, Error> {
        let flat = Mat::from_slice(&self.data)?;
        let shaped = flat.reshape(4, self.height)?;
        Ok(shaped.try_clone()?)
    }
}

/// Decodes compressed still-frame bytes into a 3-channel BGR background.
pub fn decode_frame(im_bytes: &[u8]) -> Result<Mat, Error> {
    let buf = Mat::from_slice(im_bytes)?;
    let img = imdecode(&buf, IMREAD_COLOR)?;
    if img.cols() == 0 || img.rows() == 0 {
        return Err(Error::msg("failed to decode frame bytes"));
    }
    Ok(img)
}

/// Decodes asset bytes, keeping the alpha channel when present, and
/// normalizes the result to a size-capped BGRA buffer.
pub fn decode_asset(im_bytes: &[u8], max_dimension: i32) -> Result<AssetBuffer, Error> {
    let buf = Mat::from_slice(im_bytes)?;
    let img = imdecode(&buf, IMREAD_UNCHANGED)?;
    if img.cols() == 0 || img.rows() == 0 {
        return Err(Error::msg("failed to decode asset bytes"));
    }
    normalize_asset(&img, max_dimension)
}

/// Ensures 4 channels and caps the longest side at `max_dimension`.
pub fn normalize_asset(img: &Mat, max_dimension: i32) -> Result<AssetBuffer, Error> {
    let mut bgra = Mat::default();
    match img.channels() {
        1 => cvt_color(img, &mut bgra, COLOR_GRAY2BGRA, 0)?,
        3 => cvt_color(img, &mut bgra, COLOR_BGR2BGRA, 0)?,
        4 => bgra = img.try_clone()?,
        n => return Err(Error::msg(format!("unsupported channel count: {n}"))),
    }

    let longest = bgra.cols().max(bgra.rows());
    if longest > max_dimension {
        let scale = max_dimension as f32 / longest as f32;
        let new_w = ((bgra.cols() as f32 * scale).round() as i32).max(1);
        let new_h = ((bgra.rows() as f32 * scale).round() as i32).max(1);
        let mut capped = Mat::default();
        resize(&bgra, &mut capped, Size::new(new_w, new_h), 0.0, 0.0, INTER_AREA)?;
        bgra = capped;
    }

    AssetBuffer::from_mat(&bgra)
}

/// Encodes a composited background for the frame transport reply.
pub fn encode_jpeg(img: &Mat) -> Result<Vec<u8>, Error> {
    let mut buf: Vector<u8> = Vector::new();
    imencode(".jpg", img, &mut buf)?;
    Ok(buf.to_vec())
}

/// Encodes a normalized asset for the disk cache tier.
pub fn encode_png(buffer: &AssetBuffer) -> Result<Vec<u8>, Error> {
    let mat = buffer.to_mat()?;
    let mut buf: Vector<u8> = Vector::new();
    imencode(".png", &mat, &mut buf)?;
    Ok(buf.to_vec())
}

fn imencode(ext: &str, img: &Mat, buf: &mut Vector<u8>) -> Result<(), Error> {
    let params: Vector<i32> = Vector::new();
    if !opencv::imgcodecs::imencode(ext, img, buf, &params)? {
        return Err(Error::msg(format!("failed to encode image as {ext}")));
    }
    Ok(())
}

/// Transport-safe text encoding of a composited frame reply.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
