use fieldpack::{CodecConfig, CutoffMask, GridDims, LayeredCodec};

fn main() {
    let dims = GridDims::new(64, 64, 32);
    let field = (0..dims.len())
        .map(|j| {
            let (x, y, z) = dims.coords(j);
            (x as f32 * 0.1).sin() * (y as f32 * 0.07).cos() + z as f32 * 0.01
        })
        .collect::<Vec<_>>();
    let codec = LayeredCodec::new(CodecConfig::default()).unwrap();
    let mask = CutoffMask::uniform(1e-4f32);

    for _ in 0..50 {
        let mut scratch = field.clone();
        let encoded = codec.encode(dims, &mut scratch, true, &mask).unwrap();
        let decoded = codec.decode(dims, &encoded).unwrap();
        assert_eq!(decoded.len(), field.len());
    }
}
