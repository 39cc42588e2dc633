use super::*;

#[test]
fn test_multi_word_operations() {
  let mut bitmap = Bitmap::zero(128);

  bitmap.set(0).unwrap();
  bitmap.set(63).unwrap();
  bitmap.set(64).unwrap();
  bitmap.set(99).unwrap();

  assert!(bitmap.get(0).unwrap());
  assert!(bitmap.get(63).unwrap());
  assert!(bitmap.get(64).unwrap());
  assert!(bitmap.get(99).unwrap());
  assert!(!bitmap.get(32).unwrap());
  assert!(!bitmap.get(96).unwrap());
  assert_eq!(bitmap.used(), 4);
}

#[test]
fn test_bulk_operations() {
  let mut bitmap = Bitmap::zero(192);

  bitmap.set(5).unwrap();
  bitmap.set(35).unwrap();
  bitmap.set(65).unwrap();

  bitmap.clear_all();
  assert!(!bitmap.get(5).unwrap());
  assert!(!bitmap.get(65).unwrap());
  assert!(bitmap.is_clear());

  bitmap.set_all();
  assert!(bitmap.get(0).unwrap());
  assert!(bitmap.get(191).unwrap());
  assert!(bitmap.is_full());
}

#[test]
fn test_search_operations() {
  let mut bitmap = Bitmap::zero(128);

  assert_eq!(bitmap.find_fs(), None);
  assert_eq!(bitmap.find_fc(), Some(0));

  bitmap.set(5).unwrap();
  bitmap.set(65).unwrap();
  assert_eq!(bitmap.find_fs(), Some(5));
  assert_eq!(bitmap.find_fc(), Some(0));

  bitmap.set(0).unwrap();
  assert_eq!(bitmap.find_fc(), Some(1));

  bitmap.set_all();
  assert_eq!(bitmap.find_fc(), None);
  assert_eq!(bitmap.find_fs(), Some(0));
}

#[test]
fn test_find_from_wraps() {
  let mut bitmap = Bitmap::zero(70);
  for i in 10..70 {
    bitmap.set(i).unwrap();
  }

  assert_eq!(bitmap.find_fc_from(3), Some(3));
  assert_eq!(bitmap.find_fc_from(12), Some(0));
  assert_eq!(bitmap.find_fc_from(500), Some(0));
}

#[test]
fn test_partial_word_is_bounded() {
  let mut bitmap = Bitmap::with_capacity(3, 256);
  bitmap.set(0).unwrap();
  bitmap.set(1).unwrap();
  bitmap.set(2).unwrap();

  assert_eq!(bitmap.find_fc(), None);
  assert!(bitmap.is_full());
  assert!(bitmap.set(3).is_err());
}

#[test]
fn test_double_set_and_clear() {
  let mut bitmap = Bitmap::zero(16);

  bitmap.set(4).unwrap();
  assert_eq!(bitmap.set(4), Err(BitmapError::AlreadySet(4)));
  bitmap.clear(4).unwrap();
  assert_eq!(bitmap.clear(4), Err(BitmapError::NotSet(4)));
  assert_eq!(bitmap.used(), 0);
}

#[test]
fn test_reset_changes_length() {
  let mut bitmap = Bitmap::with_capacity(8, 512);
  bitmap.set(7).unwrap();

  bitmap.reset(512).unwrap();
  assert_eq!(bitmap.bits(), 512);
  assert!(bitmap.is_clear());
  assert!(!bitmap.get(7).unwrap());

  assert!(matches!(
    bitmap.reset(513),
    Err(BitmapError::InsufficientSize { have: 512, need: 513 })
  ));
}

#[test]
fn test_error_handling() {
  let mut bitmap = Bitmap::zero(64);

  assert!(bitmap.set(63).is_ok());
  assert!(bitmap.set(64).is_err());
  assert!(bitmap.get(64).is_err());
  assert!(bitmap.clear(64).is_err());
  assert!(bitmap.check(128).is_err());
}
