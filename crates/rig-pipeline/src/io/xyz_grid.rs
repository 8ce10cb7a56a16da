//! Binary XYZ depth rasters: three little-endian `i32` header values
//! (`rows`, `cols`, `channels` = 3) followed by `rows * cols * 3` `f32`
//! samples in row-major order. Invalid pixels are stored as `(0, 0, 0)`.

use anyhow::{ensure, Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rig_core::DepthCloud;

fn read_i32(r: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Read an XYZ raster into a depth cloud.
pub fn read_xyz_grid(path: &Path) -> Result<DepthCloud> {
    let file = File::open(path)
        .with_context(|| format!("cannot open file for reading: {}", path.display()))?;
    let mut r = BufReader::new(file);

    let rows = read_i32(&mut r)?;
    let cols = read_i32(&mut r)?;
    let channels = read_i32(&mut r)?;
    ensure!(
        rows >= 0 && cols >= 0,
        "negative dimensions in XYZ raster {}",
        path.display()
    );
    ensure!(
        channels == 3,
        "expecting 3 channels in XYZ raster {}, got {channels}",
        path.display()
    );

    let n = rows as usize * cols as usize;
    let mut data = Vec::with_capacity(n);
    let mut buf = [0u8; 4];
    for _ in 0..n {
        let mut px = [0f32; 3];
        for c in &mut px {
            r.read_exact(&mut buf)?;
            *c = f32::from_le_bytes(buf);
        }
        data.push(px);
    }

    Ok(DepthCloud::new(rows as usize, cols as usize, data))
}

/// Write a depth cloud as an XYZ raster.
pub fn write_xyz_grid(path: &Path, cloud: &DepthCloud) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot open file for writing: {}", path.display()))?;
    let mut w = BufWriter::new(file);

    w.write_all(&(cloud.rows() as i32).to_le_bytes())?;
    w.write_all(&(cloud.cols() as i32).to_le_bytes())?;
    w.write_all(&3i32.to_le_bytes())?;

    for px in cloud.data() {
        for c in px {
            w.write_all(&c.to_le_bytes())?;
        }
    }
    Ok(())
}
