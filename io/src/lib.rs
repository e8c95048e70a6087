//! 3D File I/O Module
//!
//! - PLY (Polygon File Format): ASCII and binary little-endian reading of
//!   point clouds and meshes, ASCII writing of point clouds
//! - GLB (binary glTF 2.0): mesh export

pub mod glb;
pub mod ply;

pub use glb::{encode_glb, read_glb_json, write_glb, GLB_MIME_TYPE};
pub use ply::{read_ply, read_ply_mesh, write_ply};
pub use recon_3d::TriangleMesh;

pub use recon_core::{Error, Result};

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Read a PLY file from disk as a mesh (possibly without faces).
pub fn load_ply_mesh(path: impl AsRef<Path>) -> Result<TriangleMesh> {
    let file = File::open(path)?;
    read_ply_mesh(BufReader::new(file))
}

/// Write `mesh` as `.glb` to `path`.
pub fn save_glb(path: impl AsRef<Path>, mesh: &TriangleMesh) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_glb(&mut writer, mesh)?;
    writer.flush()?;
    Ok(())
}
