//! 掩码处理 (Mask projection / crop / accumulate)

use anyhow::{anyhow, Result};
use image::{imageops, GrayImage, ImageBuffer, Luma};
use ndarray::{Array2, ArrayView3};

use crate::Detection;

pub type MaskF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Resizes a letterboxed prototype mask back onto the original frame.
///
/// The letterbox pads right/bottom only, so the mask is stretched to the
/// `max(h, w)` square and the top-left `width x height` window is kept.
pub fn scale_mask(mask: &MaskF32, width: u32, height: u32) -> MaskF32 {
    let anti_size = width.max(height);
    let resized = imageops::resize(mask, anti_size, anti_size, imageops::FilterType::Triangle);
    imageops::crop_imm(&resized, 0, 0, width, height).to_image()
}

/// Zeroes everything outside `x1 <= x < x2, y1 <= y < y2` and binarizes at 0.5 to {0, 255}.
pub fn crop_mask(mask: &MaskF32, det: &Detection) -> GrayImage {
    let b = &det.bbox;
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let (xf, yf) = (x as f32, y as f32);
        let inside = xf >= b.xmin() && xf < b.xmax() && yf >= b.ymin() && yf < b.ymax();
        if inside && mask.get_pixel(x, y).0[0] > 0.5 {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// 掩码系数 × 原型 → 每个检测的原图尺寸二值掩码
///
/// `protos` is `(nm, mh, mw)`; each detection carries an `nm`-long embedding
/// and a box already in frame coordinates.
pub fn process_mask(
    protos: ArrayView3<f32>,
    dets: &[Detection],
    width: u32,
    height: u32,
) -> Result<Vec<GrayImage>> {
    if dets.is_empty() {
        return Ok(Vec::new());
    }

    let (nm, mh, mw) = protos.dim();
    let protos = protos
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((nm, mh * mw))?;

    let mut coefs = Array2::<f32>::zeros((dets.len(), nm));
    for (i, det) in dets.iter().enumerate() {
        if det.embedding.len() != nm {
            return Err(anyhow!(
                "mask embedding has {} values, prototypes have {}",
                det.embedding.len(),
                nm
            ));
        }
        for (j, v) in det.embedding.iter().enumerate() {
            coefs[[i, j]] = *v;
        }
    }

    let masks = coefs.dot(&protos);

    let mut ys = Vec::with_capacity(dets.len());
    for (row, det) in masks.rows().into_iter().zip(dets) {
        let mask_im = MaskF32::from_raw(mw as u32, mh as u32, row.to_vec())
            .ok_or_else(|| anyhow!("can not create mask image from projection"))?;
        let mask_original = scale_mask(&mask_im, width, height);
        ys.push(crop_mask(&mask_original, det));
    }
    Ok(ys)
}

/// Adds a `{0, 1}` (or any u8) sub-mask into `acc` at `(x0, y0)`, saturating at 255.
pub fn accumulate(acc: &mut GrayImage, sub: &GrayImage, x0: u32, y0: u32) {
    let w = sub.width().min(acc.width().saturating_sub(x0));
    let h = sub.height().min(acc.height().saturating_sub(y0));
    for y in 0..h {
        for x in 0..w {
            let p = acc.get_pixel_mut(x0 + x, y0 + y);
            p.0[0] = p.0[0].saturating_add(sub.get_pixel(x, y).0[0]);
        }
    }
}

/// `> 0 → 255`
pub fn binarize(mask: &mut GrayImage) {
    for p in mask.pixels_mut() {
        p.0[0] = if p.0[0] > 0 { 255 } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bbox;
    use ndarray::Array3;

    #[test]
    fn test_accumulate_saturates() {
        let mut acc = GrayImage::new(20, 20);
        let ones = GrayImage::from_pixel(10, 10, Luma([1u8]));
        accumulate(&mut acc, &ones, 0, 0);
        accumulate(&mut acc, &ones, 5, 5);
        assert_eq!(acc.get_pixel(7, 7).0[0], 2);

        let full = GrayImage::from_pixel(10, 10, Luma([200u8]));
        accumulate(&mut acc, &full, 5, 5);
        accumulate(&mut acc, &full, 5, 5);
        assert_eq!(acc.get_pixel(7, 7).0[0], 255);

        binarize(&mut acc);
        assert_eq!(acc.get_pixel(7, 7).0[0], 255);
        assert_eq!(acc.get_pixel(2, 2).0[0], 255);
        assert_eq!(acc.get_pixel(18, 2).0[0], 0);
        assert!(acc.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn test_accumulate_clips_at_border() {
        let mut acc = GrayImage::new(8, 8);
        let ones = GrayImage::from_pixel(6, 6, Luma([1u8]));
        accumulate(&mut acc, &ones, 5, 5);
        assert_eq!(acc.get_pixel(7, 7).0[0], 1);
        assert_eq!(acc.get_pixel(4, 4).0[0], 0);
    }

    #[test]
    fn test_crop_mask_box_bounds() {
        let mask = MaskF32::from_pixel(10, 10, Luma([1.0]));
        let det = Detection::new(Bbox::new(2., 3., 5., 6., 0, 0.9), vec![]);
        let m = crop_mask(&mask, &det);
        assert_eq!(m.get_pixel(2, 3).0[0], 255);
        assert_eq!(m.get_pixel(4, 5).0[0], 255);
        // right/bottom edges are exclusive
        assert_eq!(m.get_pixel(5, 5).0[0], 0);
        assert_eq!(m.get_pixel(4, 6).0[0], 0);
        assert_eq!(m.get_pixel(1, 3).0[0], 0);
    }

    #[test]
    fn test_process_mask_projects_and_crops() {
        // uniform prototypes, positive embedding -> mask fills the box only
        let protos = Array3::<f32>::from_elem((32, 16, 16), 0.1);
        let det = Detection::new(Bbox::new(10., 20., 40., 50., 0, 0.9), vec![1.0; 32]);
        let masks = process_mask(protos.view(), &[det], 64, 48).unwrap();
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].dimensions(), (64, 48));
        assert_eq!(masks[0].get_pixel(10, 20).0[0], 255);
        assert_eq!(masks[0].get_pixel(39, 47).0[0], 255);
        assert_eq!(masks[0].get_pixel(40, 30).0[0], 0);
        assert_eq!(masks[0].get_pixel(5, 5).0[0], 0);
    }

    #[test]
    fn test_process_mask_rejects_bad_embedding() {
        let protos = Array3::<f32>::zeros((32, 4, 4));
        let det = Detection::new(Bbox::new(0., 0., 2., 2., 0, 0.9), vec![1.0; 8]);
        assert!(process_mask(protos.view(), &[det], 16, 16).is_err());
    }
}
