//! Tests for meshes, tagged binary files and the configuration file

use super::scratch_dir;
use crate::*;
use densecut_core::{Error, Point3d, TriangleMesh};
use std::fs;

fn pyramid() -> TriangleMesh {
    TriangleMesh::from_vertices_and_faces(
        vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.5),
        ],
        vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
    )
}

#[test]
fn test_obj_mesh_survives_write_and_read() {
    let dir = scratch_dir("obj");
    let path = dir.join("pyramid.obj");

    write_mesh(&pyramid(), &path).unwrap();
    let loaded = read_mesh(&path).unwrap();

    assert_eq!(loaded.vertex_count(), 4);
    assert_eq!(loaded.faces, pyramid().faces);
    assert!((loaded.vertices[3].z - 1.5).abs() < 1e-6);
    assert!(loaded.is_watertight());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_colored_obj_lines_carry_rgb() {
    let dir = scratch_dir("obj-colors");
    let path = dir.join("colored.obj");
    let mut mesh = pyramid();
    mesh.set_colors(vec![[255, 0, 0]; 4]);

    write_mesh(&mesh, &path).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    let first_vertex = text.lines().find(|l| l.starts_with("v ")).unwrap();
    assert_eq!(first_vertex.split_whitespace().count(), 7);
    assert!(first_vertex.ends_with("1.0000 0.0000 0.0000"));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_obj_quads_are_fan_triangulated() {
    let dir = scratch_dir("obj-quads");
    let path = dir.join("square.obj");
    fs::write(
        &path,
        "# unit square\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1 4//1\n",
    )
    .unwrap();

    let loaded = read_mesh(&path).unwrap();
    assert_eq!(loaded.vertex_count(), 4);
    assert_eq!(loaded.faces, vec![[0, 1, 2], [0, 2, 3]]);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_colored_obj_reads_back_positions() {
    let dir = scratch_dir("obj-colors-read");
    let path = dir.join("colored.obj");
    let mut mesh = pyramid();
    mesh.set_colors(vec![[0, 128, 255]; 4]);

    write_mesh(&mesh, &path).unwrap();
    let loaded = read_mesh(&path).unwrap();
    assert_eq!(loaded.faces, mesh.faces);
    assert!((loaded.vertices[1].x - 1.0).abs() < 1e-6);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_obj_face_out_of_range_is_parse_error() {
    let dir = scratch_dir("obj-bad-index");
    let path = dir.join("bad.obj");
    fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\nf 1 2 9\n").unwrap();

    assert!(read_mesh(&path).is_err());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_binary_mesh_is_exact() {
    let dir = scratch_dir("mesh-bin");
    let path = dir.join("denseReconstruction.bin");
    let mut mesh = pyramid();
    mesh.vertices[1].x = 0.1 + 0.2;

    write_mesh(&mesh, &path).unwrap();
    assert_eq!(read_mesh(&path).unwrap(), mesh);
    assert!(!dir.join("denseReconstruction.bin.partial").exists());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_tag_mismatch_is_rejected() {
    let dir = scratch_dir("tags");
    let path = dir.join("cams.bin");
    save_array_of_arrays(&path, &[vec![0, 1], vec![], vec![4]]).unwrap();

    assert_eq!(
        load_array_of_arrays(&path).unwrap(),
        vec![vec![0, 1], vec![], vec![4]]
    );
    match load_mesh(&path) {
        Err(Error::UnsupportedFormat(message)) => assert!(message.contains("DCMS")),
        other => panic!("expected a tag error, got {:?}", other),
    }

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_missing_cache_file_is_io_not_found() {
    let dir = scratch_dir("missing");
    match load_mesh(dir.join("nothing.bin")) {
        Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected not found, got {:?}", other),
    }
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn test_unknown_mesh_extension() {
    assert!(matches!(
        read_mesh("mesh.stl"),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_config_defaults_and_overrides() {
    let defaults = ConfigFile::from_json("{}").unwrap();
    assert_eq!(defaults, ConfigFile::default());
    assert_eq!(defaults.global.sim_threshold, 0.0);
    assert_eq!(defaults.large_scale.grid_level0, 1024);
    assert_eq!(defaults.large_scale.base_dir_name, "root01024");
    assert!(!defaults.delaunaycut.export_debug_gc);

    let config = ConfigFile::from_json(
        r#"{
            "global": { "simThr": -0.2 },
            "largeScale": { "gridLevel0": 512, "baseDirName": "root00512" },
            "delaunaycut": { "exportDebugGC": true, "smoothness": 0.5 }
        }"#,
    )
    .unwrap();
    assert_eq!(config.global.sim_threshold, -0.2);
    assert_eq!(config.large_scale.grid_level0, 512);
    assert_eq!(config.large_scale.base_dir_name, "root00512");
    assert!(config.delaunaycut.export_debug_gc);
    assert_eq!(config.delaunaycut.smoothness, Some(0.5));
    assert_eq!(config.delaunaycut.vote_weight, None);
}

#[test]
fn test_invalid_config_is_a_config_error() {
    assert!(matches!(
        ConfigFile::from_json(r#"{ "largeScale": { "gridLevel0": 0 } }"#),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        ConfigFile::from_json(r#"{ "largeScale": { "gridLevel0": "big" } }"#),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        ConfigFile::from_json(r#"{ "unknownSection": {} }"#),
        Err(Error::Config(_))
    ));
    assert!(read_config_file("definitely/not/here.json").is_err());
}
