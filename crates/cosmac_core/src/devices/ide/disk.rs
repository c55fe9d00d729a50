/*
    Cosmac

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Raw sector image files backing an IDE drive, and the cylinder/head/sector geometry presented
//! to the host program.

use std::{
    fmt::{self, Display},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::error::CoreError;

pub const SECTOR_SIZE: usize = 512;

pub const DEFAULT_HEADS: u8 = 16;
pub const DEFAULT_SECTORS_PER_TRACK: u8 = 63;
pub const MAX_CYLINDERS: u16 = 16383;

/// Cylinder, head and sector count of a drive. Sector ids start at 1.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DriveGeometry {
    pub c: u16,
    pub h: u8,
    pub s: u8,
}

impl Display for DriveGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[c:{} h:{} s:{}]", self.c, self.h, self.s)
    }
}

impl DriveGeometry {
    /// The translated geometry reported for a drive of `sectors` total sectors.
    pub fn from_sectors(sectors: u64) -> Self {
        let per_cylinder = DEFAULT_HEADS as u64 * DEFAULT_SECTORS_PER_TRACK as u64;
        let c = (sectors / per_cylinder).clamp(1, MAX_CYLINDERS as u64) as u16;
        Self {
            c,
            h: DEFAULT_HEADS,
            s: DEFAULT_SECTORS_PER_TRACK,
        }
    }

    pub fn total_sectors(&self) -> u32 {
        self.c as u32 * self.h as u32 * self.s as u32
    }

    /// Translate a cylinder/head/sector address to a logical block address. Returns None for a
    /// sector id of 0 or an address outside the geometry.
    pub fn chs_to_lba(&self, c: u16, h: u8, s: u8) -> Option<u32> {
        if s == 0 || s > self.s || h >= self.h || c >= self.c {
            return None;
        }
        Some((c as u32 * self.h as u32 + h as u32) * self.s as u32 + (s as u32 - 1))
    }

    pub fn lba_to_chs(&self, lba: u32) -> Option<(u16, u8, u8)> {
        let per_cylinder = self.h as u32 * self.s as u32;
        let c = lba / per_cylinder;
        if c >= self.c as u32 {
            return None;
        }
        let rem = lba % per_cylinder;
        Some((c as u16, (rem / self.s as u32) as u8, (rem % self.s as u32) as u8 + 1))
    }
}

/// An attached disk image. The file length defines the capacity and is never extended.
pub struct DiskImage {
    path: PathBuf,
    file: File,
    sectors: u64,
    geometry: DriveGeometry,
}

impl DiskImage {
    /// Open an existing image for reading and writing. Empty images and images that are not a
    /// whole number of sectors are refused.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(CoreError::EmptyImage { path: path.to_path_buf() });
        }
        if len % SECTOR_SIZE as u64 != 0 {
            return Err(CoreError::ImageSize {
                path: path.to_path_buf(),
                len,
                sector_size: SECTOR_SIZE,
            });
        }
        let sectors = len / SECTOR_SIZE as u64;
        let geometry = DriveGeometry::from_sectors(sectors);
        log::debug!(
            "Opened disk image {} with {} sectors, geometry {}",
            path.display(),
            sectors,
            geometry
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            sectors,
            geometry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    pub fn geometry(&self) -> DriveGeometry {
        self.geometry
    }

    pub fn read_sector(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), CoreError> {
        self.file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_sector(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), CoreError> {
        self.file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        self.file.write_all(buf)?;
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_for_32mb_image() {
        let geom = DriveGeometry::from_sectors(65536);
        assert_eq!(geom, DriveGeometry { c: 65, h: 16, s: 63 });
        assert_eq!(geom.chs_to_lba(0, 0, 1), Some(0));
        assert_eq!(geom.chs_to_lba(1, 2, 3), Some(16 * 63 + 2 * 63 + 2));
        assert_eq!(geom.chs_to_lba(0, 0, 0), None);
        assert_eq!(geom.lba_to_chs(16 * 63 + 2 * 63 + 2), Some((1, 2, 3)));
    }

    #[test]
    fn cylinders_are_capped() {
        let geom = DriveGeometry::from_sectors(u32::MAX as u64);
        assert_eq!(geom.c, MAX_CYLINDERS);
    }

    #[test]
    fn partial_sector_image_is_refused() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 700]).unwrap();
        assert!(matches!(
            DiskImage::open(file.path()),
            Err(CoreError::ImageSize { len: 700, .. })
        ));
    }

    #[test]
    fn empty_image_is_refused() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(DiskImage::open(file.path()), Err(CoreError::EmptyImage { .. })));
    }

    #[test]
    fn sectors_round_trip() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(4 * SECTOR_SIZE as u64).unwrap();
        let mut disk = DiskImage::open(file.path()).unwrap();
        let mut data = [0u8; SECTOR_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        disk.write_sector(3, &data).unwrap();
        let mut back = [0u8; SECTOR_SIZE];
        disk.read_sector(3, &mut back).unwrap();
        assert_eq!(data, back);
        assert!(disk.read_sector(4, &mut back).is_err());
    }
}
