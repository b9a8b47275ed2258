use metrics::register_convex_counter;

register_convex_counter!(pub INVALID_REQUEST_ERROR_TOTAL, "Count of invalid request errors");
register_convex_counter!(pub REFUSED_ERROR_TOTAL, "Count of refused-by-server errors");
register_convex_counter!(pub OVERLOADED_ERROR_TOTAL, "Count of overloaded/backpressure errors");
register_convex_counter!(pub INTERNAL_ERROR_TOTAL, "Count of internal errors fatal to an instance");
