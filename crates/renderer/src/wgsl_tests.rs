#[test]
fn renderer_wgsl_sources_parse_successfully() {
    parse_wgsl(
        "dab_blend_uniform.wgsl",
        include_str!("../shaders/dab_blend_uniform.wgsl"),
    );
    parse_wgsl(
        "dab_blend_instanced.wgsl",
        include_str!("../shaders/dab_blend_instanced.wgsl"),
    );
    parse_wgsl(
        "tile_present.wgsl",
        include_str!("../shaders/tile_present.wgsl"),
    );
}

#[test]
fn bundled_programs_load_from_default_dir() {
    let dir = crate::default_shader_dir();
    for name in [
        crate::BLEND_UNIFORM_PROGRAM,
        crate::BLEND_INSTANCED_PROGRAM,
        crate::PRESENT_PROGRAM,
    ] {
        let program = crate::load_program(&dir, name)
            .unwrap_or_else(|error| panic!("bundled program {name} must validate: {error}"));
        assert_eq!(program.name(), name);
        assert!(program.source().contains("fn fs_main"));
    }
}

#[test]
fn uniform_array_capacity_matches_shader_constant() {
    let source = include_str!("../shaders/dab_blend_uniform.wgsl");
    let expected = format!(
        "const MAX_DABS: u32 = {}u;",
        crate::uniform_array::MAX_DABS_PER_PASS
    );
    assert!(source.contains(&expected));
}

fn parse_wgsl(label: &str, source: &str) {
    naga::front::wgsl::parse_str(source).unwrap_or_else(|error| {
        panic!(
            "WGSL parse failed for {label}: {}",
            error.emit_to_string(source)
        )
    });
}
