use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, Tensor};
use image::{Rgb, RgbImage};

use crate::data::{denormalize, RgbdItem, CHANNELS, DEPTH_CHANNEL};

pub fn get_env(key: &str) -> Result<String> {
    std::env::var(key).context(format!("getting env variable `{key}`"))
}

pub fn get_env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Converts one `[C, H, W]` model output back to a [0, 1] item.
pub fn tensor_to_item<B: Backend>(x: Tensor<B, 3>, normalized: bool) -> RgbdItem {
    let size = x.shape().dims[2];
    let pixels = x
        .into_data()
        .convert::<f32>()
        .value
        .into_iter()
        .map(|v| if normalized { denormalize(v) } else { v.clamp(0.0, 1.0) })
        .collect();
    RgbdItem::new(pixels, size)
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0) as u8
}

pub fn rgb_image(item: &RgbdItem) -> RgbImage {
    let (r, g, b) = (item.channel(0), item.channel(1), item.channel(2));
    let size = item.size as u32;
    RgbImage::from_fn(size, size, |x, y| {
        let idx = (y * size + x) as usize;
        Rgb([to_u8(r[idx]), to_u8(g[idx]), to_u8(b[idx])])
    })
}

pub fn depth_image(item: &RgbdItem) -> RgbImage {
    let depth = item.channel(DEPTH_CHANNEL);
    let size = item.size as u32;
    RgbImage::from_fn(size, size, |x, y| {
        let v = to_u8(depth[(y * size + x) as usize]);
        Rgb([v, v, v])
    })
}

/// 2×2 panel: input RGB | input depth over reconstruction RGB | reconstruction depth.
pub fn reconstruction_figure(input: &RgbdItem, reconstruction: &RgbdItem) -> RgbImage {
    let size = input.size as u32;
    let panels = [
        (rgb_image(input), 0, 0),
        (depth_image(input), size, 0),
        (rgb_image(reconstruction), 0, size),
        (depth_image(reconstruction), size, size),
    ];

    let mut figure = RgbImage::new(2 * size, 2 * size);
    for (panel, x0, y0) in panels.iter() {
        for (x, y, pixel) in panel.enumerate_pixels() {
            if x < size && y < size {
                figure.put_pixel(x0 + x, y0 + y, *pixel);
            }
        }
    }
    figure
}

pub fn show_image_terminal_color(item: &RgbdItem) {
    let (r, g, b) = (item.channel(0), item.channel(1), item.channel(2));
    for i in 0..item.size {
        for j in 0..item.size {
            let idx = i * item.size + j;
            let color = termion::color::Rgb(to_u8(r[idx]), to_u8(g[idx]), to_u8(b[idx]));
            print!("{} ", termion::color::Bg(color));
        }
        println!("{}", termion::color::Bg(termion::color::Reset));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub dim: [usize; 3],
    pub count: usize,
    pub value_range: [f32; 2],
    pub mean: [f32; CHANNELS],
    pub var: [f32; CHANNELS],
    pub stddev: [f32; CHANNELS],
}

impl Stats {
    /// Per-channel moments, each image weighted equally.
    pub fn from_iter(iter: impl Iterator<Item = RgbdItem>) -> Self {
        let mut s = [0.0f64; CHANNELS];
        let mut s2 = [0.0f64; CHANNELS];
        let mut count = 0;
        let mut size = 0;
        let mut value_range = [f32::INFINITY, f32::NEG_INFINITY];

        for item in iter {
            size = item.size;
            let d = (item.size * item.size) as f64;
            for c in 0..CHANNELS {
                let channel = item.channel(c);
                channel.iter().for_each(|x| {
                    value_range[0] = value_range[0].min(*x);
                    value_range[1] = value_range[1].max(*x);
                });
                s[c] += channel.iter().map(|x| *x as f64).sum::<f64>() / d;
                s2[c] += channel.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>() / d;
            }
            count += 1;
        }

        let n = count.max(1) as f64;
        let mean = s.map(|v| (v / n) as f32);
        let mut var = [0.0f32; CHANNELS];
        for c in 0..CHANNELS {
            let m = s[c] / n;
            var[c] = (s2[c] / n - m * m).max(0.0) as f32;
        }
        Self {
            dim: [CHANNELS, size, size],
            count,
            value_range,
            mean,
            var,
            stddev: var.map(f32::sqrt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(values: [f32; CHANNELS], size: usize) -> RgbdItem {
        let pixels = values
            .iter()
            .flat_map(|v| std::iter::repeat(*v).take(size * size))
            .collect();
        RgbdItem::new(pixels, size)
    }

    #[test]
    fn figure_places_each_panel() {
        let input = item([1.0, 0.0, 0.0, 0.5], 3);
        let recon = item([0.0, 0.0, 1.0, 1.0], 3);
        let figure = reconstruction_figure(&input, &recon);

        assert_eq!(figure.dimensions(), (6, 6));
        assert_eq!(figure.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(figure.get_pixel(4, 1), &Rgb([127, 127, 127]));
        assert_eq!(figure.get_pixel(2, 5), &Rgb([0, 0, 255]));
        assert_eq!(figure.get_pixel(5, 5), &Rgb([255, 255, 255]));
    }

    #[test]
    fn tensor_round_trip_denormalizes() {
        type B = burn::backend::NdArray;
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;
        let x: Tensor<B, 3> = Tensor::zeros([CHANNELS, 2, 2], &device);

        let item = tensor_to_item(x.clone(), true);
        assert!(item.pixels.iter().all(|v| *v == 0.5));
        let item = tensor_to_item(x, false);
        assert!(item.pixels.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn stats_per_channel() {
        let stats = Stats::from_iter(
            vec![item([0.0, 1.0, 0.5, 0.2], 2), item([1.0, 1.0, 0.5, 0.4], 2)].into_iter(),
        );
        assert_eq!(stats.count, 2);
        assert_eq!(stats.dim, [CHANNELS, 2, 2]);
        assert_eq!(stats.value_range, [0.0, 1.0]);
        assert!((stats.mean[0] - 0.5).abs() < 1.0e-6);
        assert!((stats.stddev[0] - 0.5).abs() < 1.0e-6);
        assert!(stats.var[1].abs() < 1.0e-6);
        assert!((stats.mean[3] - 0.3).abs() < 1.0e-6);
    }
}
