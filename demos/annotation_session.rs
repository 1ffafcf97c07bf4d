//! Example: a small interactive annotation session
//!
//! Run with: cargo run --example annotation_session

use labelvol::{
    parse_axistags, CompressionMethod, DataType, LabelVolume, Region, VolumeMeta,
};
use ndarray::{ArrayD, IxDyn};

const ERASER: u8 = 255;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("labelvol Example: Annotation Session");
    println!("====================================\n");

    // A 128^3 volume annotated with 32^3 blocks
    let meta = VolumeMeta::new(
        vec![128, 128, 128],
        DataType::U8,
        parse_axistags("zyx").unwrap(),
        vec![32, 32, 32],
    )?
    .with_compression(CompressionMethod::Zstd)
    .with_eraser(ERASER as u64);

    let volume: LabelVolume<u8> = LabelVolume::create_at("mem:", meta).await?;
    println!("Volume: 128 x 128 x 128, blocks 32 x 32 x 32");
    println!("Eraser value: {}\n", ERASER);

    // Paint a brush stroke of label 1 in slice z = 10
    let stroke = Region::new(vec![10, 40, 40], vec![11, 44, 80])?;
    let patch = ArrayD::from_elem(IxDyn(&[1, 4, 40]), 1u8);
    volume.write(&stroke, &patch).await?;
    println!("Painted label 1 along {}", stroke);

    // Paint label 2 deeper in the stack
    let stroke2 = Region::new(vec![90, 60, 60], vec![91, 70, 70])?;
    let patch2 = ArrayD::from_elem(IxDyn(&[1, 10, 10]), 2u8);
    volume.write(&stroke2, &patch2).await?;
    println!("Painted label 2 along {}", stroke2);

    println!("\nClean blocks after painting:");
    for extent in volume.clean_blocks() {
        println!("  {}", extent);
    }
    println!("Stats: {}\n", volume.stats().summary());

    // Erase half of the first stroke: eraser pixels clear, zeros preserve
    let erase = Region::new(vec![10, 40, 40], vec![11, 44, 60])?;
    let eraser_patch = ArrayD::from_elem(IxDyn(&[1, 4, 20]), ERASER);
    volume.write(&erase, &eraser_patch).await?;
    let remaining = volume.read(&stroke).await?;
    let count = remaining.iter().filter(|&&v| v == 1).count();
    println!("Erased {}; {} pixels of label 1 remain", erase, count);

    // Project all labels onto a single z slice
    let view = Region::new(vec![0, 0, 0], vec![1, 128, 128])?;
    let projection = volume.project(&view).await?;
    let visible = projection.iter().filter(|&&v| v > 0.0).count();
    println!(
        "Projection along z: {} labeled pixels, values in (0, 1]",
        visible
    );

    // Purge label 1: label 2 is renumbered to 1 to keep the set contiguous
    let rewritten = volume.purge_label(1).await?;
    println!("\nPurged label 1 ({} blocks rewritten)", rewritten);
    let relabeled = volume.read(&stroke2).await?;
    println!(
        "Former label-2 stroke now reads {} (labels stay contiguous)",
        relabeled[[0, 0, 0]]
    );

    println!("\nFinal stats: {}", volume.stats().summary());
    Ok(())
}
