//! Property coverage for the image ring layout and state machine.

use proptest::prelude::*;
use transport::{RingPool, RingSpec, SlotState};
use world::{ElemType, Image};

const MAX_SHAPE: (u32, u32, u32) = (16, 16, 3);
const MAX_IMAGES: usize = 4;

fn pool() -> RingPool {
    RingPool::build([(
        "ring",
        RingSpec {
            capacity: 1,
            max_images: MAX_IMAGES,
            max_shape: MAX_SHAPE,
            elem: ElemType::U8,
        },
    )])
    .expect("build ring")
}

fn arb_image() -> impl Strategy<Value = Image> {
    (1..=MAX_SHAPE.0, 1..=MAX_SHAPE.1, 1..=MAX_SHAPE.2).prop_flat_map(|(h, w, c)| {
        let len = (h * w * c) as usize;
        proptest::collection::vec(any::<u8>(), len)
            .prop_map(move |pixels| Image::from_pixels(w, h, c as u8, pixels))
    })
}

proptest! {
    /// A written batch reads back pixel-equal and length-equal.
    #[test]
    fn write_read_identity(images in proptest::collection::vec(arb_image(), 0..=MAX_IMAGES)) {
        let pool = pool();
        pool.write("ring", 0, &images).expect("write within declared bounds");

        let back = pool.read("ring", 0, None).expect("read published slot");
        prop_assert_eq!(back.len(), images.len());
        for (a, b) in back.iter().zip(images.iter()) {
            prop_assert_eq!(a, b);
        }

        pool.release("ring", 0);
        prop_assert_eq!(pool.state("ring", 0).unwrap(), SlotState::Free);
    }

    /// Overwriting a slot with a new batch never leaks images from the
    /// previous, larger batch.
    #[test]
    fn rewrite_hides_previous_batch(
        first in proptest::collection::vec(arb_image(), 1..=MAX_IMAGES),
        second in proptest::collection::vec(arb_image(), 0..=MAX_IMAGES),
    ) {
        let pool = pool();
        pool.write("ring", 0, &first).unwrap();
        pool.read("ring", 0, None).unwrap();
        pool.release("ring", 0);

        pool.write("ring", 0, &second).unwrap();
        let back = pool.read("ring", 0, None).unwrap();
        prop_assert_eq!(back.len(), second.len());
        pool.release("ring", 0);
    }

    /// Releasing twice leaves the same free state as releasing once.
    #[test]
    fn double_release_converges(images in proptest::collection::vec(arb_image(), 1..=2)) {
        let pool = pool();
        pool.write("ring", 0, &images).unwrap();
        pool.read("ring", 0, None).unwrap();

        pool.release("ring", 0);
        let once = pool.state("ring", 0).unwrap();
        pool.release("ring", 0);
        let twice = pool.state("ring", 0).unwrap();
        prop_assert_eq!(once, twice);
        prop_assert_eq!(once, SlotState::Free);
    }
}

/// The largest legal batch fits the declared slot size exactly.
#[test]
fn max_batch_fits_declared_capacity() {
    let pool = pool();
    let (h, w, c) = MAX_SHAPE;
    let full: Vec<Image> = (0..MAX_IMAGES)
        .map(|i| {
            let mut img = Image::new_u8(w, h, c as u8);
            img.pixels.fill(i as u8);
            img
        })
        .collect();

    pool.write("ring", 0, &full).expect("maximal batch must fit");
    let back = pool.read("ring", 0, None).unwrap();
    assert_eq!(back.len(), MAX_IMAGES);
    for (i, img) in back.iter().enumerate() {
        assert!(img.pixels.iter().all(|b| *b == i as u8));
    }
    pool.release("ring", 0);
}
